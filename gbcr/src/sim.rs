//! Simulated adapter used by the unit tests.
//!
//! Implements [`Port`] on top of an in-memory cartridge: 16-bit bus with a
//! flat ROM/flash array, an MBC5-style bank register set and banked external
//! RAM. Every received command is echoed and answered the way the firmware
//! does. Clones share state so a test can keep a handle after moving the port
//! into a session.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;
use crate::protocol::{BLOCK_SIZE, CommandFrame, FRAME_LEN, Opcode, PAGE_SIZE};

pub(crate) const SIM_BOARD_INFO: &[u8; 16] = b"GBCR-AVR-V2.0.0\0";
const SIM_DATE: &str = "Mar 14 2021";
const SIM_TIME: &str = "12:34:56";

enum Pending {
    Page(u16),
    Ram { address: u16, len: usize },
}

struct State {
    rom: Vec<u8>,
    ram: Vec<u8>,
    rom_bank: u16,
    ram_bank: u8,
    ram_enabled: bool,
    chip_id: [u8; 2],
    erase_attempts: u16,
    corruption: Option<(u16, u8)>,
    silent: bool,
    ack: Option<[u8; FRAME_LEN]>,
    chunk_size: usize,
    end_of_stream: bool,
    input: Vec<u8>,
    pending: Option<Pending>,
    output: VecDeque<u8>,
    frames: Vec<CommandFrame>,
    bank_writes: Vec<(u16, u8)>,
    closed: bool,
    timeout: Duration,
    baud_rate: u32,
}

impl State {
    fn peek(&self, address: u16) -> u8 {
        let addr = usize::from(address);
        let value = match address {
            0x0000..=0x3FFF => self
                .rom
                .get(addr)
                .copied(),
            0x4000..=0x7FFF => self
                .rom
                .get(usize::from(self.rom_bank) * 0x4000 + addr - 0x4000)
                .copied(),
            0xA000..=0xBFFF if self.ram_enabled && !self.ram.is_empty() => {
                let index = usize::from(self.ram_bank) * 0x2000 + addr - 0xA000;
                Some(self.ram[index % self.ram.len()])
            },
            _ => None,
        }
        .unwrap_or(0xFF);

        match self.corruption {
            Some((at, mask)) if at == address => value ^ mask,
            _ => value,
        }
    }

    fn poke_ram(&mut self, address: u16, value: u8) {
        if self.ram.is_empty() || !(0xA000..=0xBFFF).contains(&address) {
            return;
        }
        let index = usize::from(self.ram_bank) * 0x2000 + usize::from(address) - 0xA000;
        let len = self.ram.len();
        self.ram[index % len] = value;
    }

    fn register_write(&mut self, address: u16, value: u8) {
        self.bank_writes
            .push((address, value));
        match address {
            0x2000..=0x2FFF => self.rom_bank = (self.rom_bank & 0x100) | u16::from(value),
            0x3000..=0x3FFF => {
                self.rom_bank = (self.rom_bank & 0xFF) | (u16::from(value & 0x01) << 8);
            },
            0x4000..=0x5FFF => self.ram_bank = value,
            _ => {},
        }
    }

    fn respond(&mut self, bytes: &[u8]) {
        if !self.silent {
            self.output
                .extend(bytes.iter().copied());
        }
    }

    fn process(&mut self) {
        loop {
            match self.pending {
                Some(Pending::Page(address)) if self.input.len() >= PAGE_SIZE => {
                    let data: Vec<u8> = self
                        .input
                        .drain(..PAGE_SIZE)
                        .collect();
                    for (i, byte) in data.into_iter().enumerate() {
                        if let Some(cell) = self
                            .rom
                            .get_mut(usize::from(address) + i)
                        {
                            *cell &= byte;
                        }
                    }
                    self.pending = None;
                },
                Some(Pending::Ram { address, len }) if self.input.len() >= len => {
                    let data: Vec<u8> = self
                        .input
                        .drain(..len)
                        .collect();
                    for (offset, byte) in (address..).zip(data) {
                        self.poke_ram(offset, byte);
                    }
                    self.pending = None;
                },
                Some(_) => break,
                None if self.input.len() >= FRAME_LEN => {
                    let mut raw = [0u8; FRAME_LEN];
                    raw.copy_from_slice(&self.input[..FRAME_LEN]);
                    self.input
                        .drain(..FRAME_LEN);
                    self.handle(CommandFrame::from_raw(raw));
                },
                None => break,
            }
        }
    }

    fn handle(&mut self, frame: CommandFrame) {
        self.frames
            .push(frame);
        let ack = self
            .ack
            .unwrap_or(*frame.as_bytes());
        self.respond(&ack);

        let address = frame
            .address()
            .unwrap_or(0);
        match frame.opcode() {
            Some(Opcode::ReadInfo) => self.respond(SIM_BOARD_INFO),
            Some(Opcode::CompileTime) => {
                let mut payload = [0u8; 32];
                payload[..SIM_DATE.len()].copy_from_slice(SIM_DATE.as_bytes());
                payload[16..16 + SIM_TIME.len()].copy_from_slice(SIM_TIME.as_bytes());
                self.respond(&payload);
            },
            Some(Opcode::ReadHeader) => {
                let header: Vec<u8> = (0..0x150u16)
                    .map(|a| self.peek(a))
                    .collect();
                self.respond(&header);
            },
            Some(Opcode::ReadBlock) => {
                let block: Vec<u8> = (0..BLOCK_SIZE as u16)
                    .map(|i| self.peek(address.wrapping_add(i)))
                    .collect();
                self.respond(&block);
            },
            Some(Opcode::DeviceId) => {
                let id = self.chip_id;
                self.respond(&id);
            },
            Some(Opcode::EraseSector) => {
                let attempts = self.erase_attempts;
                if attempts != 0 && attempts < 0x1000 {
                    let start = usize::from(address);
                    let end = (start + BLOCK_SIZE).min(self.rom.len());
                    if start < end {
                        self.rom[start..end].fill(0xFF);
                    }
                }
                self.respond(&attempts.to_be_bytes());
            },
            Some(Opcode::WritePage) => self.pending = Some(Pending::Page(address)),
            Some(Opcode::RamOn) => self.ram_enabled = true,
            Some(Opcode::RamOff) => self.ram_enabled = false,
            Some(Opcode::WriteByte) => {
                let value = u8::from_str_radix(
                    std::str::from_utf8(&frame.as_bytes()[6..]).unwrap_or("00"),
                    16,
                )
                .unwrap_or(0);
                self.register_write(address, value);
            },
            Some(Opcode::RamWrite2k) => {
                self.pending = Some(Pending::Ram {
                    address: 0xA000,
                    len: 0x800,
                });
            },
            Some(Opcode::RamWrite4kLower) => {
                self.pending = Some(Pending::Ram {
                    address: 0xA000,
                    len: 0x1000,
                });
            },
            Some(Opcode::RamWrite4kUpper) => {
                self.pending = Some(Pending::Ram {
                    address: 0xB000,
                    len: 0x1000,
                });
            },
            None => {},
        }
    }
}

/// In-memory adapter implementing [`Port`].
#[derive(Clone)]
pub(crate) struct SimAdapter {
    state: Arc<Mutex<State>>,
}

impl SimAdapter {
    /// Blank 32 KB SST39SF010A flash cartridge without RAM.
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                rom: vec![0xFF; 0x8000],
                ram: Vec::new(),
                rom_bank: 1,
                ram_bank: 0,
                ram_enabled: false,
                chip_id: [0xBF, 0xB5],
                erase_attempts: 42,
                corruption: None,
                silent: false,
                ack: None,
                chunk_size: usize::MAX,
                end_of_stream: false,
                input: Vec::new(),
                pending: None,
                output: VecDeque::new(),
                frames: Vec::new(),
                bank_writes: Vec::new(),
                closed: false,
                timeout: Duration::from_millis(100),
                baud_rate: 115_200,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap()
    }

    pub(crate) fn with_rom(self, rom: Vec<u8>) -> Self {
        self.lock().rom = rom;
        self
    }

    pub(crate) fn with_ram(self, ram: Vec<u8>) -> Self {
        self.lock().ram = ram;
        self
    }

    pub(crate) fn with_chip_id(self, manufacturer: u8, device: u8) -> Self {
        self.lock().chip_id = [manufacturer, device];
        self
    }

    pub(crate) fn with_erase_attempts(self, attempts: u16) -> Self {
        self.lock().erase_attempts = attempts;
        self
    }

    /// Flip the bits of `mask` in every read of `address`.
    pub(crate) fn with_corruption(self, address: u16, mask: u8) -> Self {
        self.lock().corruption = Some((address, mask));
        self
    }

    /// Accept commands but never answer.
    pub(crate) fn silent(self) -> Self {
        self.lock().silent = true;
        self
    }

    pub(crate) fn with_ack(self, ack: [u8; FRAME_LEN]) -> Self {
        self.lock().ack = Some(ack);
        self
    }

    /// Deliver at most `size` bytes per read call.
    pub(crate) fn with_chunk_size(self, size: usize) -> Self {
        self.lock().chunk_size = size;
        self
    }

    /// Report end-of-stream instead of a timeout once the output is drained.
    pub(crate) fn with_end_of_stream(self) -> Self {
        self.lock().end_of_stream = true;
        self
    }

    pub(crate) fn queue_output(&self, bytes: &[u8]) {
        self.lock()
            .output
            .extend(bytes.iter().copied());
    }

    pub(crate) fn frames(&self) -> Vec<CommandFrame> {
        self.lock()
            .frames
            .clone()
    }

    pub(crate) fn bank_writes(&self) -> Vec<(u16, u8)> {
        self.lock()
            .bank_writes
            .clone()
    }

    pub(crate) fn rom(&self) -> Vec<u8> {
        self.lock()
            .rom
            .clone()
    }

    pub(crate) fn ram(&self) -> Vec<u8> {
        self.lock()
            .ram
            .clone()
    }

    pub(crate) fn ram_enabled(&self) -> bool {
        self.lock().ram_enabled
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn port_timeout(&self) -> Duration {
        self.lock().timeout
    }
}

impl Read for SimAdapter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if state
            .output
            .is_empty()
        {
            let kind = if state.end_of_stream {
                io::ErrorKind::UnexpectedEof
            } else {
                io::ErrorKind::TimedOut
            };
            return Err(io::Error::new(kind, "no data"));
        }
        let n = buf
            .len()
            .min(state.chunk_size)
            .min(state.output.len());
        for slot in &mut buf[..n] {
            *slot = state
                .output
                .pop_front()
                .unwrap_or(0);
        }
        Ok(n)
    }
}

impl Write for SimAdapter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        state
            .input
            .extend_from_slice(buf);
        state.process();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimAdapter {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.lock().timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.lock().timeout
    }

    fn baud_rate(&self) -> u32 {
        self.lock().baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        let mut state = self.lock();
        state
            .input
            .clear();
        state
            .output
            .clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "sim"
    }

    fn close(&mut self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }
}
