//! Cartridge header interpretation.
//!
//! The header occupies 0x100-0x14F of every cartridge and is returned in full
//! (together with the 0x100 bytes before it) by `READHDR0`.

use byteorder::{BigEndian, ByteOrder};

use crate::cartridge::address::{HEADER_LENGTH, RAM_BANK_SIZE, ROM_BANK_SIZE};
use crate::cartridge::mapper::{Mapper, cartridge_type_name};
use crate::error::{Error, Result};

const LOGO_OFFSET: usize = 0x104;
const TITLE_OFFSET: usize = 0x134;
const TITLE_LEN: usize = 16;
const CGB_FLAG_OFFSET: usize = 0x143;
const SGB_FLAG_OFFSET: usize = 0x146;
const CARTRIDGE_TYPE_OFFSET: usize = 0x147;
const ROM_SIZE_OFFSET: usize = 0x148;
const RAM_SIZE_OFFSET: usize = 0x149;
const HEADER_CHECKSUM_OFFSET: usize = 0x14D;
const GLOBAL_CHECKSUM_OFFSET: usize = 0x14E;

/// The boot logo every licensed cartridge carries at 0x104.
pub const NINTENDO_LOGO: [u8; 48] = [
    0xCE, 0xED, 0x66, 0x66, 0xCC, 0x0D, 0x00, 0x0B, 0x03, 0x73, 0x00, 0x83, 0x00, 0x0C, 0x00, 0x0D,
    0x00, 0x08, 0x11, 0x1F, 0x88, 0x89, 0x00, 0x0E, 0xDC, 0xCC, 0x6E, 0xE6, 0xDD, 0xDD, 0xD9, 0x99,
    0xBB, 0xBB, 0x67, 0x63, 0x6E, 0x0E, 0xEC, 0xCC, 0xDD, 0xDC, 0x99, 0x9F, 0xBB, 0xB9, 0x33, 0x3E,
];

/// Parsed cartridge header.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CartridgeHeader {
    /// Game title with trailing NULs removed.
    pub title: String,
    /// Cartridge type byte.
    pub cartridge_type: u8,
    /// Name of the cartridge type.
    pub cartridge_type_name: &'static str,
    /// Memory bank controller family.
    pub mapper: Mapper,
    /// ROM size code.
    pub rom_size_code: u8,
    /// Number of 16 KB ROM banks.
    pub rom_banks: u16,
    /// ROM size in bytes.
    pub rom_size: usize,
    /// RAM size code.
    pub ram_size_code: u8,
    /// Number of 8 KB RAM banks (a 2 KB RAM counts as one bank).
    pub ram_banks: u8,
    /// RAM size in bytes.
    pub ram_size: usize,
    /// Game Boy Color support flag.
    pub cgb: bool,
    /// Super Game Boy support flag.
    pub sgb: bool,
    /// Whether the boot logo matches.
    pub logo_valid: bool,
    /// Header checksum stored at 0x14D.
    pub header_checksum: u8,
    /// Header checksum computed over 0x134-0x14C.
    pub computed_header_checksum: u8,
    /// Global checksum stored at 0x14E-0x14F.
    pub global_checksum: u16,
}

impl CartridgeHeader {
    /// Parse a header payload of at least 0x150 bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LENGTH {
            return Err(Error::TruncatedResponse {
                expected: HEADER_LENGTH,
                actual: data.len(),
            });
        }

        let title_bytes = &data[TITLE_OFFSET..TITLE_OFFSET + TITLE_LEN];
        let title_end = title_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TITLE_LEN);
        let title = String::from_utf8_lossy(&title_bytes[..title_end])
            .trim_end()
            .to_string();

        let cartridge_type = data[CARTRIDGE_TYPE_OFFSET];
        let rom_size_code = data[ROM_SIZE_OFFSET];
        let rom_banks = rom_banks(rom_size_code)?;
        let ram_size_code = data[RAM_SIZE_OFFSET];
        let (ram_size, ram_banks) = ram_geometry(ram_size_code)?;

        Ok(Self {
            title,
            cartridge_type,
            cartridge_type_name: cartridge_type_name(cartridge_type),
            mapper: Mapper::from_cartridge_type(cartridge_type),
            rom_size_code,
            rom_banks,
            rom_size: usize::from(rom_banks) * ROM_BANK_SIZE,
            ram_size_code,
            ram_banks,
            ram_size,
            cgb: matches!(data[CGB_FLAG_OFFSET], 0x80 | 0xC0),
            sgb: data[SGB_FLAG_OFFSET] == 0x03,
            logo_valid: data[LOGO_OFFSET..LOGO_OFFSET + NINTENDO_LOGO.len()] == NINTENDO_LOGO,
            header_checksum: data[HEADER_CHECKSUM_OFFSET],
            computed_header_checksum: header_checksum(data),
            global_checksum: BigEndian::read_u16(&data[GLOBAL_CHECKSUM_OFFSET..]),
        })
    }

    /// Whether the stored header checksum matches the computed one.
    pub fn header_checksum_valid(&self) -> bool {
        self.header_checksum == self.computed_header_checksum
    }

    /// Whether `rom` sums to the stored global checksum.
    pub fn global_checksum_valid(&self, rom: &[u8]) -> bool {
        global_checksum(rom) == self.global_checksum
    }

    /// Number of 4 KB blocks in the ROM.
    pub fn rom_blocks(&self) -> usize {
        self.rom_size / crate::protocol::BLOCK_SIZE
    }
}

/// Header checksum over 0x134-0x14C: `x = x - byte - 1`.
pub fn header_checksum(data: &[u8]) -> u8 {
    data[TITLE_OFFSET..HEADER_CHECKSUM_OFFSET]
        .iter()
        .fold(0u8, |x, &b| x.wrapping_sub(b).wrapping_sub(1))
}

/// Sum of every ROM byte except the two global checksum bytes.
pub fn global_checksum(rom: &[u8]) -> u16 {
    rom.iter()
        .enumerate()
        .filter(|(i, _)| !(GLOBAL_CHECKSUM_OFFSET..GLOBAL_CHECKSUM_OFFSET + 2).contains(i))
        .fold(0u16, |sum, (_, &b)| sum.wrapping_add(u16::from(b)))
}

fn rom_banks(code: u8) -> Result<u16> {
    if code > 8 {
        return Err(Error::Unsupported(format!("ROM size code 0x{code:02X}")));
    }
    Ok(2u16 << code)
}

fn ram_geometry(code: u8) -> Result<(usize, u8)> {
    let geometry = match code {
        0 => (0, 0),
        1 => (0x800, 1),
        2 => (RAM_BANK_SIZE, 1),
        3 => (4 * RAM_BANK_SIZE, 4),
        4 => (16 * RAM_BANK_SIZE, 16),
        5 => (8 * RAM_BANK_SIZE, 8),
        other => return Err(Error::Unsupported(format!("RAM size code 0x{other:02X}"))),
    };
    Ok(geometry)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a header payload with a valid logo and checksum.
    pub(crate) fn sample_header(title: &str, cart_type: u8, rom_code: u8, ram_code: u8) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_LENGTH];
        data[LOGO_OFFSET..LOGO_OFFSET + NINTENDO_LOGO.len()].copy_from_slice(&NINTENDO_LOGO);
        data[TITLE_OFFSET..TITLE_OFFSET + title.len()].copy_from_slice(title.as_bytes());
        data[CARTRIDGE_TYPE_OFFSET] = cart_type;
        data[ROM_SIZE_OFFSET] = rom_code;
        data[RAM_SIZE_OFFSET] = ram_code;
        data[HEADER_CHECKSUM_OFFSET] = header_checksum(&data);
        data
    }

    #[test]
    fn test_parse_basic_fields() {
        let data = sample_header("TETRIS", 0x00, 0x00, 0x00);
        let header = CartridgeHeader::parse(&data).unwrap();

        assert_eq!(header.title, "TETRIS");
        assert_eq!(header.mapper, Mapper::RomOnly);
        assert_eq!(header.cartridge_type_name, "ROM ONLY");
        assert_eq!(header.rom_banks, 2);
        assert_eq!(header.rom_size, 32 * 1024);
        assert_eq!(header.rom_blocks(), 8);
        assert_eq!(header.ram_size, 0);
        assert!(header.logo_valid);
        assert!(header.header_checksum_valid());
        assert!(!header.cgb);
        assert!(!header.sgb);
    }

    #[test]
    fn test_rom_size_codes() {
        for (code, banks) in [(0u8, 2u16), (1, 4), (5, 64), (6, 128), (8, 512)] {
            let header = CartridgeHeader::parse(&sample_header("X", 0x19, code, 0)).unwrap();
            assert_eq!(header.rom_banks, banks);
            assert_eq!(header.rom_size, usize::from(banks) * 0x4000);
        }
        assert!(matches!(
            CartridgeHeader::parse(&sample_header("X", 0x19, 9, 0)),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_ram_size_codes() {
        let cases = [
            (0u8, 0usize, 0u8),
            (1, 2 * 1024, 1),
            (2, 8 * 1024, 1),
            (3, 32 * 1024, 4),
            (4, 128 * 1024, 16),
            (5, 64 * 1024, 8),
        ];
        for (code, size, banks) in cases {
            let header = CartridgeHeader::parse(&sample_header("X", 0x1B, 1, code)).unwrap();
            assert_eq!(header.ram_size, size, "code {code}");
            assert_eq!(header.ram_banks, banks, "code {code}");
        }
    }

    #[test]
    fn test_bad_checksum_and_logo_are_reported() {
        let mut data = sample_header("POKEMON RED", 0x13, 5, 3);
        data[HEADER_CHECKSUM_OFFSET] ^= 0xFF;
        data[LOGO_OFFSET] = 0;

        let header = CartridgeHeader::parse(&data).unwrap();
        assert_eq!(header.title, "POKEMON RED");
        assert_eq!(header.mapper, Mapper::Mbc3);
        assert!(!header.header_checksum_valid());
        assert!(!header.logo_valid);
    }

    #[test]
    fn test_color_and_super_flags() {
        let mut data = sample_header("X", 0, 0, 0);
        data[CGB_FLAG_OFFSET] = 0xC0;
        data[SGB_FLAG_OFFSET] = 0x03;
        let header = CartridgeHeader::parse(&data).unwrap();
        assert!(header.cgb);
        assert!(header.sgb);
    }

    #[test]
    fn test_short_header_is_truncated() {
        assert!(matches!(
            CartridgeHeader::parse(&[0u8; 0x100]),
            Err(Error::TruncatedResponse {
                expected: 0x150,
                actual: 0x100
            })
        ));
    }

    #[test]
    fn test_global_checksum_skips_stored_bytes() {
        let mut rom = vec![1u8; 0x200];
        rom[0x14E] = 0xAB;
        rom[0x14F] = 0xCD;
        assert_eq!(global_checksum(&rom), 0x200 - 2);

        let sum = global_checksum(&rom);
        rom[0x14E..0x150].copy_from_slice(&sum.to_be_bytes());
        let header = CartridgeHeader::parse(&rom).unwrap();
        assert!(header.global_checksum_valid(&rom));
    }
}
