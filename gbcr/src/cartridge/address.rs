//! Cartridge address arithmetic.
//!
//! The adapter sees a 16-bit cartridge bus. ROM occupies 0x0000-0x7FFF, with
//! 0x4000-0x7FFF being the switchable bank window, and external RAM is mapped
//! at 0xA000-0xBFFF. Reads and erases work on 4 KB blocks.

use crate::error::{Error, Result};
use crate::protocol::{BLOCK_SIZE, encode_hex16};

/// Address of the cartridge header read by `READHDR0`.
pub const HEADER_ADDRESS: u16 = 0x0000;

/// Length of the header payload.
pub const HEADER_LENGTH: usize = 0x150;

/// Start of the external RAM window.
pub const RAM_WINDOW_ADDRESS: u16 = 0xA000;

/// Size of one external RAM bank as seen through the window.
pub const RAM_BANK_SIZE: usize = 0x2000;

/// Size of one ROM bank.
pub const ROM_BANK_SIZE: usize = 0x4000;

/// Blocks in one ROM bank.
pub const BLOCKS_PER_BANK: usize = ROM_BANK_SIZE / BLOCK_SIZE;

/// Blocks in the unbanked 32 KB ROM view.
pub const BLOCKS_PER_IMAGE: usize = 8;

/// Start of the switchable ROM window.
pub const SWITCHABLE_WINDOW_ADDRESS: u16 = 0x4000;

/// Address of block `index` in the flat cartridge address space.
pub fn block_address(index: usize) -> Result<u16> {
    index
        .checked_mul(BLOCK_SIZE)
        .and_then(|addr| u16::try_from(addr).ok())
        .ok_or_else(|| {
            Error::InvalidArgument(format!(
                "block {index} is outside the 16-bit address space"
            ))
        })
}

/// Render an address as the 4-digit field of a command frame.
pub fn encode_address(address: u32) -> Result<String> {
    encode_hex16(address)
}

/// How RAM sectors are addressed in `RDBK` frames.
///
/// Two conventions exist across host tools and are kept apart deliberately;
/// which one a given firmware honours is not known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RamAddressing {
    /// Sector `s` is read at `0xA000 + s * 0x1000`.
    #[default]
    FixedWindow,
    /// The block index `0xA + s` is sent as-is in the address field.
    BlockIndexed,
}

impl RamAddressing {
    /// Address field for RAM sector `sector` (0 or 1 within an 8 KB bank).
    pub fn sector_address(self, sector: usize) -> Result<u16> {
        let window_block = usize::from(RAM_WINDOW_ADDRESS) / BLOCK_SIZE;
        match self {
            Self::FixedWindow => block_address(window_block + sector),
            Self::BlockIndexed => u16::try_from(window_block + sector).map_err(|_| {
                Error::InvalidArgument(format!("RAM sector {sector} is out of range"))
            }),
        }
    }
}

/// Where a logical ROM block is visible on the cartridge bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomLocation {
    /// ROM bank that must be selected (0 means the fixed bank, no switch).
    pub bank: u16,
    /// Bus address of the block.
    pub address: u16,
}

/// Map a logical ROM block to its bank and bus address.
///
/// Blocks 0-3 live in the fixed bank at 0x0000-0x3FFF. Every later group of
/// four blocks is bank `b` seen through 0x4000-0x7FFF.
pub fn rom_location(rom_block: usize) -> Result<RomLocation> {
    let bank = rom_block / BLOCKS_PER_BANK;
    let within = rom_block % BLOCKS_PER_BANK;
    let base = if bank == 0 {
        0
    } else {
        usize::from(SWITCHABLE_WINDOW_ADDRESS)
    };
    let bank = u16::try_from(bank)
        .map_err(|_| Error::InvalidArgument(format!("ROM block {rom_block} is out of range")))?;
    Ok(RomLocation {
        bank,
        address: block_address(base / BLOCK_SIZE + within)?,
    })
}
