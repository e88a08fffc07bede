//! Memory bank controllers and the register writes that switch banks.

use std::fmt;

use crate::error::{Error, Result};

/// A single `WR` register write on the cartridge bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankWrite {
    /// Register address.
    pub address: u16,
    /// Value written.
    pub value: u8,
}

const fn write(address: u16, value: u8) -> BankWrite {
    BankWrite { address, value }
}

/// Register that selects the external RAM bank on every supported MBC.
pub const RAM_BANK_REGISTER: u16 = 0x4000;

/// Memory bank controller family of a cartridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Mapper {
    /// No bank switching (32 KB ROM).
    RomOnly,
    /// MBC1.
    Mbc1,
    /// MBC2.
    Mbc2,
    /// MBC3 (with or without timer).
    Mbc3,
    /// MMM01.
    Mmm01,
    /// MBC5 (with or without rumble).
    Mbc5,
    /// MBC6.
    Mbc6,
    /// MBC7.
    Mbc7,
    /// Cartridge type byte without a known controller.
    Unknown(u8),
}

impl Mapper {
    /// Controller family for a cartridge type byte (header offset 0x147).
    pub fn from_cartridge_type(code: u8) -> Self {
        match code {
            0x00 | 0x08 | 0x09 => Self::RomOnly,
            0x01..=0x03 => Self::Mbc1,
            0x05 | 0x06 => Self::Mbc2,
            0x0B | 0x0C | 0x0D => Self::Mmm01,
            0x0F..=0x13 => Self::Mbc3,
            0x19..=0x1E => Self::Mbc5,
            0x20 => Self::Mbc6,
            0x22 => Self::Mbc7,
            other => Self::Unknown(other),
        }
    }

    /// Whether [`Mapper::rom_bank_writes`] can switch banks on this controller.
    pub fn supports_banking(self) -> bool {
        matches!(
            self,
            Self::RomOnly | Self::Mbc1 | Self::Mbc2 | Self::Mbc3 | Self::Mbc5
        )
    }

    /// Register writes that map ROM bank `bank` into 0x4000-0x7FFF.
    pub fn rom_bank_writes(self, bank: u16) -> Result<Vec<BankWrite>> {
        let [hi, lo] = bank.to_be_bytes();
        let writes = match self {
            Self::RomOnly if bank <= 1 => Vec::new(),
            Self::RomOnly => {
                return Err(Error::InvalidArgument(format!(
                    "ROM-only cartridges have no bank {bank}"
                )));
            },
            Self::Mbc1 if bank < 0x20 => vec![write(0x2100, lo)],
            Self::Mbc1 => vec![
                write(0x6000, 0x00),
                write(0x4000, (lo >> 5) | (hi << 3)),
                write(0x2100, lo & 0x1F),
            ],
            Self::Mbc2 => vec![write(0x2100, lo & 0x0F)],
            Self::Mbc3 => vec![write(0x2100, lo & 0x7F)],
            Self::Mbc5 => vec![write(0x2100, lo), write(0x3000, hi & 0x01)],
            other => {
                return Err(Error::Unsupported(format!(
                    "bank switching on {other} cartridges"
                )));
            },
        };
        Ok(writes)
    }

    /// Register write that maps external RAM bank `bank` into 0xA000-0xBFFF.
    pub fn ram_bank_write(bank: u8) -> BankWrite {
        write(RAM_BANK_REGISTER, bank)
    }
}

impl fmt::Display for Mapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RomOnly => write!(f, "ROM ONLY"),
            Self::Mbc1 => write!(f, "MBC1"),
            Self::Mbc2 => write!(f, "MBC2"),
            Self::Mbc3 => write!(f, "MBC3"),
            Self::Mmm01 => write!(f, "MMM01"),
            Self::Mbc5 => write!(f, "MBC5"),
            Self::Mbc6 => write!(f, "MBC6"),
            Self::Mbc7 => write!(f, "MBC7"),
            Self::Unknown(code) => write!(f, "unknown (0x{code:02X})"),
        }
    }
}

/// Human readable name of a cartridge type byte.
pub fn cartridge_type_name(code: u8) -> &'static str {
    match code {
        0x00 => "ROM ONLY",
        0x01 => "MBC1",
        0x02 => "MBC1+RAM",
        0x03 => "MBC1+RAM+BATTERY",
        0x05 => "MBC2",
        0x06 => "MBC2+BATTERY",
        0x08 => "ROM+RAM",
        0x09 => "ROM+RAM+BATTERY",
        0x0B => "MMM01",
        0x0C => "MMM01+RAM",
        0x0D => "MMM01+RAM+BATTERY",
        0x0F => "MBC3+TIMER+BATTERY",
        0x10 => "MBC3+TIMER+RAM+BATTERY",
        0x11 => "MBC3",
        0x12 => "MBC3+RAM",
        0x13 => "MBC3+RAM+BATTERY",
        0x19 => "MBC5",
        0x1A => "MBC5+RAM",
        0x1B => "MBC5+RAM+BATTERY",
        0x1C => "MBC5+RUMBLE",
        0x1D => "MBC5+RUMBLE+RAM",
        0x1E => "MBC5+RUMBLE+RAM+BATTERY",
        0x20 => "MBC6",
        0x22 => "MBC7+SENSOR+RUMBLE+RAM+BATTERY",
        _ => "unknown",
    }
}
