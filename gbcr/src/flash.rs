//! Flash programming for SST39SF0x0 cartridges.
//!
//! Programming is a strict sequence enforced by [`FlashSession`]:
//!
//! ```text
//!   Idle --check_device_id--> DeviceIdChecked --erase_block--> Erased
//!                                                               |
//!                             Verified <--verify-- Written <-write_page
//!
//!   any failure --> Fault (terminal, nothing is transmitted afterwards)
//! ```
//!
//! The device reports how many polling cycles an erase took. A count of zero
//! or one at the firmware's polling ceiling means the sector did not erase.
//! The driver never retries on its own.

use std::fmt;
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder};
use log::{debug, info, warn};

use crate::cartridge::address::{BLOCKS_PER_IMAGE, block_address};
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{BLOCK_SIZE, CommandFrame, DEVICE_ID_LEN, ERASE_RESULT_LEN, PAGE_SIZE};
use crate::reader::{CartReader, Progress};

/// Polling ceiling of the adapter firmware's erase loop.
///
/// Some firmware keeps its poll counter in a single byte, so an erase that
/// took exactly 256 polls reports 0. That case is treated as a failed erase.
pub const DEFAULT_MAX_ERASE_ATTEMPTS: u16 = 0x1000;

/// Largest image that fits the unbanked flash window.
pub const MAX_IMAGE_SIZE: usize = BLOCKS_PER_IMAGE * BLOCK_SIZE;

/// Manufacturer/device identifier pair reported by `DEVIDSST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChipId {
    /// JEDEC manufacturer byte.
    pub manufacturer: u8,
    /// Device byte.
    pub device: u8,
}

/// SST39SF010A (128 KB).
pub const SST39SF010A: ChipId = ChipId::new(0xBF, 0xB5);
/// SST39SF020A (256 KB).
pub const SST39SF020A: ChipId = ChipId::new(0xBF, 0xB6);
/// SST39SF040 (512 KB).
pub const SST39SF040: ChipId = ChipId::new(0xBF, 0xB7);

impl ChipId {
    /// Create an identifier.
    pub const fn new(manufacturer: u8, device: u8) -> Self {
        Self {
            manufacturer,
            device,
        }
    }

    /// Decode the 2-byte `DEVIDSST` payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes {
            [manufacturer, device] => Ok(Self::new(*manufacturer, *device)),
            _ => Err(Error::TruncatedResponse {
                expected: DEVICE_ID_LEN,
                actual: bytes.len(),
            }),
        }
    }

    /// Both bytes as one big-endian word, e.g. `0xBFB5`.
    pub fn as_u16(self) -> u16 {
        BigEndian::read_u16(&[self.manufacturer, self.device])
    }

    /// Part name for known SST chips.
    pub fn part_name(self) -> Option<&'static str> {
        match self {
            SST39SF010A => Some("SST39SF010A"),
            SST39SF020A => Some("SST39SF020A"),
            SST39SF040 => Some("SST39SF040"),
            _ => None,
        }
    }
}

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.as_u16())?;
        if let Some(name) = self.part_name() {
            write!(f, " ({name})")?;
        }
        Ok(())
    }
}

impl FromStr for ChipId {
    type Err = Error;

    /// Parse `BFB5` or `0xBFB5`.
    fn from_str(s: &str) -> Result<Self> {
        let digits = s
            .trim()
            .trim_start_matches("0x")
            .trim_start_matches("0X");
        if digits.len() != 4 {
            return Err(Error::InvalidArgument(format!(
                "chip id {s:?} must be 4 hex digits"
            )));
        }
        let value = u16::from_str_radix(digits, 16)
            .map_err(|e| Error::InvalidArgument(format!("chip id {s:?}: {e}")))?;
        let [manufacturer, device] = value.to_be_bytes();
        Ok(Self::new(manufacturer, device))
    }
}

/// Which chips may be programmed and when an erase counts as failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashGate {
    allowed: Vec<ChipId>,
    max_erase_attempts: u16,
}

impl Default for FlashGate {
    fn default() -> Self {
        Self {
            allowed: vec![SST39SF010A, SST39SF020A, SST39SF040],
            max_erase_attempts: DEFAULT_MAX_ERASE_ATTEMPTS,
        }
    }
}

impl FlashGate {
    /// Replace the allow-list.
    #[must_use]
    pub fn with_allowed(mut self, allowed: Vec<ChipId>) -> Self {
        self.allowed = allowed;
        self
    }

    /// Add one chip to the allow-list.
    #[must_use]
    pub fn allow(mut self, chip: ChipId) -> Self {
        if !self
            .allowed
            .contains(&chip)
        {
            self.allowed
                .push(chip);
        }
        self
    }

    /// Set the erase attempt ceiling. Counts at or above it are failures.
    #[must_use]
    pub fn with_max_erase_attempts(mut self, max: u16) -> Self {
        self.max_erase_attempts = max;
        self
    }

    /// Whether `chip` may be programmed.
    pub fn allows(&self, chip: ChipId) -> bool {
        self.allowed
            .contains(&chip)
    }

    /// Allowed chips.
    pub fn allowed(&self) -> &[ChipId] {
        &self.allowed
    }

    /// Whether a reported erase attempt count means success.
    ///
    /// A count of 0 is always a failure, including a wrapped 256.
    pub fn erase_succeeded(&self, attempts: u16) -> bool {
        attempts > 0 && attempts < self.max_erase_attempts
    }
}

/// State of a [`FlashSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashState {
    /// Nothing checked yet.
    Idle,
    /// The chip identified as an allowed part.
    DeviceIdChecked,
    /// A block was erased.
    Erased,
    /// At least one page of the erased block was written.
    Written,
    /// The erased block read back as expected.
    Verified,
    /// A step failed. Terminal for the session.
    Fault,
}

impl fmt::Display for FlashState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of one sector erase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EraseResult {
    /// Block address that was erased.
    pub address: u16,
    /// Polling cycles the device needed.
    pub attempts: u16,
}

/// Summary of [`FlashSession::program_image`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FlashReport {
    /// Chip that was programmed.
    pub chip: ChipId,
    /// Erase result of every programmed block.
    pub erases: Vec<EraseResult>,
    /// Bytes written, including 0xFF padding to whole pages.
    pub bytes_written: usize,
}

/// Shadow of the most recently erased block.
struct ErasedBlock {
    address: u16,
    expected: Vec<u8>,
}

/// Flash programming session on top of a [`CartReader`].
pub struct FlashSession<P: Port> {
    reader: CartReader<P>,
    gate: FlashGate,
    state: FlashState,
    chip: Option<ChipId>,
    block: Option<ErasedBlock>,
}

impl<P: Port> FlashSession<P> {
    /// Start a session with the default gate.
    pub fn new(reader: CartReader<P>) -> Self {
        Self::with_gate(reader, FlashGate::default())
    }

    /// Start a session with an explicit gate.
    pub fn with_gate(reader: CartReader<P>, gate: FlashGate) -> Self {
        Self {
            reader,
            gate,
            state: FlashState::Idle,
            chip: None,
            block: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> FlashState {
        self.state
    }

    /// Identifier read by the last successful device check.
    pub fn chip(&self) -> Option<ChipId> {
        self.chip
    }

    /// Get a mutable reference to the reader.
    pub fn reader_mut(&mut self) -> &mut CartReader<P> {
        &mut self.reader
    }

    /// Consume the session and return the reader.
    pub fn into_reader(self) -> CartReader<P> {
        self.reader
    }

    /// Read the chip identifier and check it against the gate.
    pub fn check_device_id(&mut self) -> Result<ChipId> {
        self.require_not_faulted("check the device id")?;

        let chip = self.guard(|s| {
            s.reader
                .read_device_id()
        })?;
        if !self
            .gate
            .allows(chip)
        {
            warn!("Refusing to program chip {chip}");
            self.state = FlashState::Fault;
            return Err(Error::DeviceIdMismatch { actual: chip });
        }

        info!("Flash chip {chip}");
        self.chip = Some(chip);
        self.block = None;
        self.state = FlashState::DeviceIdChecked;
        Ok(chip)
    }

    /// Erase 4 KB block `index`.
    pub fn erase_block(&mut self, index: usize) -> Result<EraseResult> {
        self.require_not_faulted("erase")?;
        if self.state == FlashState::Idle {
            return Err(Error::InvalidState(
                "device id must be checked before erasing".into(),
            ));
        }
        let address = block_address(index)?;

        let raw = self.guard(|s| {
            s.reader
                .link_mut()
                .transact(&CommandFrame::erase_sector(address), ERASE_RESULT_LEN)
        })?;
        let attempts = BigEndian::read_u16(&raw);
        debug!("Erased 0x{address:04X} in {attempts} cycles");

        if !self
            .gate
            .erase_succeeded(attempts)
        {
            self.state = FlashState::Fault;
            return Err(Error::FlashEraseFailed { address, attempts });
        }

        self.block = Some(ErasedBlock {
            address,
            expected: vec![0xFF; BLOCK_SIZE],
        });
        self.state = FlashState::Erased;
        Ok(EraseResult { address, attempts })
    }

    /// Program one 256-byte page inside the most recently erased block.
    pub fn write_page(&mut self, address: u16, data: &[u8]) -> Result<()> {
        self.require_not_faulted("write")?;
        if !matches!(self.state, FlashState::Erased | FlashState::Written) {
            return Err(Error::InvalidState(format!(
                "cannot write a page in state {}",
                self.state
            )));
        }
        if data.len() != PAGE_SIZE {
            return Err(Error::InvalidArgument(format!(
                "page data must be {PAGE_SIZE} bytes, got {}",
                data.len()
            )));
        }
        let offset = self.page_offset(address)?;

        self.guard(|s| {
            s.reader
                .link_mut()
                .send_payload(&CommandFrame::write_page(address), data)
        })?;

        if let Some(block) = self
            .block
            .as_mut()
        {
            block.expected[offset..offset + PAGE_SIZE].copy_from_slice(data);
        }
        self.state = FlashState::Written;
        Ok(())
    }

    /// Read the erased block back and compare it with what was written.
    ///
    /// Bytes that were not written must read back as 0xFF.
    pub fn verify(&mut self) -> Result<()> {
        self.require_not_faulted("verify")?;
        if !matches!(self.state, FlashState::Erased | FlashState::Written) {
            return Err(Error::InvalidState(format!(
                "nothing to verify in state {}",
                self.state
            )));
        }
        let Some(address) = self
            .block
            .as_ref()
            .map(|b| b.address)
        else {
            return Err(Error::InvalidState("no erased block".into()));
        };

        let actual = self.guard(|s| {
            s.reader
                .read_block_at(address)
        })?;
        let mismatch = self
            .block
            .as_ref()
            .and_then(|block| {
                block
                    .expected
                    .iter()
                    .zip(&actual)
                    .enumerate()
                    .find(|(_, (want, got))| want != got)
                    .map(|(offset, (&want, &got))| (offset, want, got))
            });

        if let Some((offset, want, got)) = mismatch {
            self.state = FlashState::Fault;
            let offset = u16::try_from(offset).unwrap_or(u16::MAX);
            return Err(Error::VerificationFailed {
                address: address.wrapping_add(offset),
                expected: want,
                actual: got,
            });
        }

        debug!("Verified block 0x{address:04X}");
        self.state = FlashState::Verified;
        Ok(())
    }

    /// Check the chip, then erase, program and verify every block of `image`.
    ///
    /// The image is padded with 0xFF to whole pages.
    pub fn program_image(&mut self, image: &[u8], progress: Progress<'_>) -> Result<FlashReport> {
        if image.is_empty() || image.len() > MAX_IMAGE_SIZE {
            return Err(Error::InvalidArgument(format!(
                "image must be 1..={MAX_IMAGE_SIZE} bytes, got {}",
                image.len()
            )));
        }

        let chip = self.check_device_id()?;

        let padded_len = image
            .len()
            .div_ceil(PAGE_SIZE)
            * PAGE_SIZE;
        let mut padded = image.to_vec();
        padded.resize(padded_len, 0xFF);

        let mut erases = Vec::new();
        let mut written = 0;
        for (index, block) in padded
            .chunks(BLOCK_SIZE)
            .enumerate()
        {
            let erase = self.erase_block(index)?;
            erases.push(erase);
            for (page, data) in block
                .chunks(PAGE_SIZE)
                .enumerate()
            {
                let offset = u16::try_from(page * PAGE_SIZE)
                    .map_err(|_| Error::InvalidArgument("page offset out of range".into()))?;
                self.write_page(erase.address + offset, data)?;
                written += data.len();
                progress(written, padded_len);
            }
            self.verify()?;
        }

        info!(
            "Programmed {written} bytes in {} blocks",
            erases.len()
        );
        Ok(FlashReport {
            chip,
            erases,
            bytes_written: written,
        })
    }

    fn page_offset(&self, address: u16) -> Result<usize> {
        let Some(block) = self
            .block
            .as_ref()
        else {
            return Err(Error::InvalidState("no erased block".into()));
        };
        let offset = usize::from(address.wrapping_sub(block.address));
        if address < block.address || offset + PAGE_SIZE > BLOCK_SIZE {
            return Err(Error::InvalidArgument(format!(
                "page 0x{address:04X} is outside erased block 0x{:04X}",
                block.address
            )));
        }
        if offset % PAGE_SIZE != 0 {
            return Err(Error::InvalidArgument(format!(
                "page address 0x{address:04X} is not {PAGE_SIZE}-byte aligned"
            )));
        }
        Ok(offset)
    }

    fn require_not_faulted(&self, action: &str) -> Result<()> {
        if self.state == FlashState::Fault {
            return Err(Error::InvalidState(format!(
                "cannot {action}: session is faulted"
            )));
        }
        Ok(())
    }

    fn guard<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = op(self);
        if result.is_err() {
            self.state = FlashState::Fault;
        }
        result
    }
}
