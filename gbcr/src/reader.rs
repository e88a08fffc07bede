//! Read operations against an inserted cartridge.
//!
//! Every operation is one request/reply round trip over the owned
//! [`LinkSession`]: send the frame, take the 8-byte acknowledgement, then read
//! a payload whose length is fixed by the opcode.

use log::{debug, info, warn};

use crate::board::{BoardInfo, CompileTime};
use crate::cartridge::address::{
    HEADER_LENGTH, RAM_BANK_SIZE, RamAddressing, block_address, rom_location,
};
use crate::cartridge::header::CartridgeHeader;
use crate::cartridge::mapper::Mapper;
use crate::error::{Error, Result};
use crate::flash::ChipId;
use crate::link::LinkSession;
use crate::port::Port;
use crate::protocol::{
    BLOCK_SIZE, BOARD_INFO_LEN, COMPILE_TIME_LEN, CommandFrame, DEVICE_ID_LEN, Opcode,
};

/// Progress callback: `(bytes_done, bytes_total)`.
pub type Progress<'a> = &'a mut dyn FnMut(usize, usize);

/// Size of a small (2 KB) cartridge RAM written with `RMWR2k00`.
const SMALL_RAM_SIZE: usize = 0x800;

/// Cartridge reader.
///
/// Generic over the port type so the same code drives a serial adapter and
/// the simulated one used in tests.
pub struct CartReader<P: Port> {
    link: LinkSession<P>,
}

#[cfg(feature = "native")]
impl CartReader<crate::port::NativePort> {
    /// Open the named serial interface and wrap it in a reader.
    pub fn open(
        serial: &crate::port::SerialConfig,
        config: crate::link::SessionConfig,
    ) -> Result<Self> {
        Ok(Self::new(LinkSession::open(serial, config)?))
    }
}

impl<P: Port> CartReader<P> {
    /// Create a reader over an open link session.
    pub fn new(link: LinkSession<P>) -> Self {
        Self { link }
    }

    /// Get a reference to the link session.
    pub fn link(&self) -> &LinkSession<P> {
        &self.link
    }

    /// Get a mutable reference to the link session.
    pub fn link_mut(&mut self) -> &mut LinkSession<P> {
        &mut self.link
    }

    /// Consume the reader and return the link session.
    pub fn into_link(self) -> LinkSession<P> {
        self.link
    }

    /// Read the 16-byte board identity (`READINFO`).
    pub fn read_board_info(&mut self) -> Result<BoardInfo> {
        let raw = self
            .link
            .transact(&CommandFrame::read_info(), BOARD_INFO_LEN)?;
        let info = BoardInfo::parse(&raw)?;
        debug!("Board: {info} ({})", info.chipset);
        Ok(info)
    }

    /// Read the firmware build date and time (`COMPTIME`).
    pub fn read_compile_time(&mut self) -> Result<CompileTime> {
        let raw = self
            .link
            .transact(&CommandFrame::compile_time(), COMPILE_TIME_LEN)?;
        CompileTime::parse(&raw)
    }

    /// Read the raw 0x150-byte header area (`READHDR0`).
    pub fn read_header(&mut self) -> Result<Vec<u8>> {
        self.link
            .transact(&CommandFrame::read_header(), HEADER_LENGTH)
    }

    /// Read and interpret the cartridge header.
    pub fn header(&mut self) -> Result<CartridgeHeader> {
        let raw = self.read_header()?;
        let header = CartridgeHeader::parse(&raw)?;
        info!(
            "Cartridge: {:?}, {}, {} KB ROM, {} KB RAM",
            header.title,
            header.cartridge_type_name,
            header.rom_size / 1024,
            header.ram_size / 1024
        );
        if !header.header_checksum_valid() {
            warn!(
                "Header checksum mismatch: stored 0x{:02X}, computed 0x{:02X}",
                header.header_checksum, header.computed_header_checksum
            );
        }
        Ok(header)
    }

    /// Read 4 KB block `index` of the flat address space.
    pub fn read_block(&mut self, index: usize) -> Result<Vec<u8>> {
        self.read_block_at(block_address(index)?)
    }

    /// Read 4 KB starting at a raw bus address.
    pub fn read_block_at(&mut self, address: u16) -> Result<Vec<u8>> {
        self.link
            .transact(&CommandFrame::read_block(address), BLOCK_SIZE)
    }

    /// Read the flash manufacturer/device identifier (`DEVIDSST`).
    pub fn read_device_id(&mut self) -> Result<ChipId> {
        let raw = self
            .link
            .transact(&CommandFrame::device_id(), DEVICE_ID_LEN)?;
        ChipId::from_bytes(&raw)
    }

    /// Enable or disable the external RAM window.
    pub fn set_ram_banking(&mut self, enabled: bool) -> Result<()> {
        self.link
            .command(&CommandFrame::ram_banking(enabled))?;
        Ok(())
    }

    /// Read blocks `0..block_count` and concatenate them in order.
    ///
    /// The whole range is checked against the address space before the first
    /// frame goes out.
    pub fn read_full_image(
        &mut self,
        block_count: usize,
        progress: Progress<'_>,
    ) -> Result<Vec<u8>> {
        let addresses = (0..block_count)
            .map(block_address)
            .collect::<Result<Vec<_>>>()?;

        let total = block_count * BLOCK_SIZE;
        let mut image = Vec::with_capacity(total);
        for address in addresses {
            image.extend(self.read_block_at(address)?);
            progress(image.len(), total);
        }
        Ok(image)
    }

    /// Write a single byte on the cartridge bus (`WR`).
    pub fn write_byte(&mut self, address: u16, value: u8) -> Result<()> {
        self.link
            .command(&CommandFrame::write_byte(address, value))?;
        Ok(())
    }

    /// Map ROM bank `bank` into 0x4000-0x7FFF.
    pub fn select_rom_bank(&mut self, mapper: Mapper, bank: u16) -> Result<()> {
        for write in mapper.rom_bank_writes(bank)? {
            self.write_byte(write.address, write.value)?;
        }
        Ok(())
    }

    /// Map external RAM bank `bank` into 0xA000-0xBFFF.
    pub fn select_ram_bank(&mut self, bank: u8) -> Result<()> {
        let write = Mapper::ram_bank_write(bank);
        self.write_byte(write.address, write.value)
    }

    /// Dump the whole ROM described by `header`, switching banks as needed.
    pub fn read_rom(&mut self, header: &CartridgeHeader, progress: Progress<'_>) -> Result<Vec<u8>> {
        if !header
            .mapper
            .supports_banking()
        {
            return Err(Error::Unsupported(format!(
                "reading {} cartridges",
                header.mapper
            )));
        }

        let blocks = header.rom_blocks();
        let total = blocks * BLOCK_SIZE;
        let mut rom = Vec::with_capacity(total);
        let mut current_bank = None;

        info!("Reading {} KB ROM in {} banks", total / 1024, header.rom_banks);
        for block in 0..blocks {
            let location = rom_location(block)?;
            if location.bank > 0 && current_bank != Some(location.bank) {
                debug!("Switching to ROM bank {}", location.bank);
                self.select_rom_bank(header.mapper, location.bank)?;
                current_bank = Some(location.bank);
            }
            rom.extend(self.read_block_at(location.address)?);
            progress(rom.len(), total);
        }

        if !header.global_checksum_valid(&rom) {
            warn!("Global checksum mismatch (stored 0x{:04X})", header.global_checksum);
        }
        Ok(rom)
    }

    /// Dump the external RAM described by `header`.
    ///
    /// The RAM window is disabled again before returning, also on failure.
    pub fn read_ram(
        &mut self,
        header: &CartridgeHeader,
        addressing: RamAddressing,
    ) -> Result<Vec<u8>> {
        if header.ram_size == 0 {
            return Ok(Vec::new());
        }

        let result = self.read_ram_banks(header, addressing);
        self.finish_ram_access(result)
    }

    fn read_ram_banks(
        &mut self,
        header: &CartridgeHeader,
        addressing: RamAddressing,
    ) -> Result<Vec<u8>> {
        let mut ram = Vec::with_capacity(header.ram_size);

        if header.ram_size < RAM_BANK_SIZE {
            self.set_ram_banking(true)?;
            let mut sector = self.read_block_at(addressing.sector_address(0)?)?;
            sector.truncate(header.ram_size);
            ram.extend(sector);
            return Ok(ram);
        }

        for bank in 0..header.ram_banks {
            if header.ram_banks > 1 {
                self.select_ram_bank(bank)?;
            }
            self.set_ram_banking(true)?;
            for sector in 0..RAM_BANK_SIZE / BLOCK_SIZE {
                ram.extend(self.read_block_at(addressing.sector_address(sector)?)?);
            }
            self.set_ram_banking(false)?;
        }
        Ok(ram)
    }

    /// Write one RAM chunk: 2 KB at 0xA000, or 4 KB at 0xA000 / 0xB000.
    pub fn write_ram(&mut self, data: &[u8], upper: bool) -> Result<()> {
        let opcode = match (data.len(), upper) {
            (SMALL_RAM_SIZE, false) => Opcode::RamWrite2k,
            (BLOCK_SIZE, false) => Opcode::RamWrite4kLower,
            (BLOCK_SIZE, true) => Opcode::RamWrite4kUpper,
            (len, _) => {
                return Err(Error::InvalidArgument(format!(
                    "RAM writes take 2048 or 4096 bytes (upper half: 4096 only), got {len}"
                )));
            },
        };
        self.link
            .send_payload(&CommandFrame::ram_write(opcode)?, data)
    }

    /// Restore a full save image into the external RAM described by `header`.
    pub fn write_ram_image(&mut self, header: &CartridgeHeader, data: &[u8]) -> Result<()> {
        if header.ram_size == 0 {
            return Err(Error::Unsupported("cartridge has no external RAM".into()));
        }
        if data.len() != header.ram_size {
            return Err(Error::InvalidArgument(format!(
                "save image is {} bytes, cartridge RAM is {} bytes",
                data.len(),
                header.ram_size
            )));
        }

        let result = self.write_ram_banks(header, data);
        self.finish_ram_access(result)
    }

    fn write_ram_banks(&mut self, header: &CartridgeHeader, data: &[u8]) -> Result<()> {
        self.select_ram_bank(0)?;

        if header.ram_size < RAM_BANK_SIZE {
            self.set_ram_banking(true)?;
            return self.write_ram(data, false);
        }

        for (bank, chunk) in data
            .chunks(RAM_BANK_SIZE)
            .enumerate()
        {
            if header.ram_banks > 1 {
                let bank = u8::try_from(bank)
                    .map_err(|_| Error::InvalidArgument(format!("RAM bank {bank} out of range")))?;
                self.select_ram_bank(bank)?;
            }
            self.set_ram_banking(true)?;
            let (lower, upper) = chunk.split_at(BLOCK_SIZE);
            self.write_ram(lower, false)?;
            self.write_ram(upper, true)?;
            self.set_ram_banking(false)?;
        }
        Ok(())
    }

    fn finish_ram_access<T>(&mut self, result: Result<T>) -> Result<T> {
        let disabled = self.set_ram_banking(false);
        match (result, disabled) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup)) => {
                warn!("Failed to disable cartridge RAM after error: {cleanup}");
                Err(e)
            },
        }
    }

    /// Close the link session.
    pub fn close(&mut self) -> Result<()> {
        self.link
            .close()
    }
}
