//! GBCR command and acknowledgement frames.
//!
//! Every command is exactly 8 ASCII bytes. Three shapes exist on the wire:
//!
//! ```text
//! +----------------------------------+
//! |  fixed opcode (8 chars)          |   READINFO, COMPTIME, RAMON000, ...
//! +----------------+-----------------+
//! | opcode (4)     | address (4 hex) |   RDBKA000, ESST1000, WRST0100
//! +--------+-------+---------+-------+
//! | WR (2) | address (4 hex) | value |   WR210003  (single byte write)
//! +--------+-----------------+-------+
//! ```
//!
//! Hex digits are uppercase and zero padded. The device answers each command
//! with an 8-byte acknowledgement whose meaning depends on the opcode.

use std::fmt;

use crate::error::{Error, Result};

/// Length of every command frame.
pub const FRAME_LEN: usize = 8;

/// Length of every acknowledgement frame.
pub const ACK_LEN: usize = 8;

/// Known opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// `READINFO`: board identity string.
    ReadInfo,
    /// `COMPTIME`: firmware build date and time.
    CompileTime,
    /// `READHDR0`: cartridge header.
    ReadHeader,
    /// `RDBK`: 4 KB block read.
    ReadBlock,
    /// `DEVIDSST`: flash manufacturer/device ID.
    DeviceId,
    /// `ESST`: erase a 4 KB flash sector.
    EraseSector,
    /// `WRST`: program a 256-byte flash page.
    WritePage,
    /// `RAMON000`: enable the cartridge RAM window.
    RamOn,
    /// `RAMOFF00`: disable the cartridge RAM window.
    RamOff,
    /// `WR`: write a single byte (bank switching).
    WriteByte,
    /// `RMWR2k00`: write 2 KB of cartridge RAM at 0xA000.
    RamWrite2k,
    /// `RMWR4kA0`: write 4 KB of cartridge RAM at 0xA000.
    RamWrite4kLower,
    /// `RMWR4kB0`: write 4 KB of cartridge RAM at 0xB000.
    RamWrite4kUpper,
}

impl Opcode {
    /// ASCII mnemonic as it appears at the start of the frame.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::ReadInfo => "READINFO",
            Self::CompileTime => "COMPTIME",
            Self::ReadHeader => "READHDR0",
            Self::ReadBlock => "RDBK",
            Self::DeviceId => "DEVIDSST",
            Self::EraseSector => "ESST",
            Self::WritePage => "WRST",
            Self::RamOn => "RAMON000",
            Self::RamOff => "RAMOFF00",
            Self::WriteByte => "WR",
            Self::RamWrite2k => "RMWR2k00",
            Self::RamWrite4kLower => "RMWR4kA0",
            Self::RamWrite4kUpper => "RMWR4kB0",
        }
    }

    /// Identify the opcode of a raw frame.
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        const FIXED: [Opcode; 9] = [
            Opcode::ReadInfo,
            Opcode::CompileTime,
            Opcode::ReadHeader,
            Opcode::DeviceId,
            Opcode::RamOn,
            Opcode::RamOff,
            Opcode::RamWrite2k,
            Opcode::RamWrite4kLower,
            Opcode::RamWrite4kUpper,
        ];
        const PREFIXED: [Opcode; 3] = [Opcode::ReadBlock, Opcode::EraseSector, Opcode::WritePage];

        if frame.len() != FRAME_LEN {
            return None;
        }
        FIXED
            .into_iter()
            .find(|op| frame == op.mnemonic().as_bytes())
            .or_else(|| {
                PREFIXED
                    .into_iter()
                    .find(|op| frame.starts_with(op.mnemonic().as_bytes()))
            })
            .or_else(|| frame.starts_with(b"WR").then_some(Self::WriteByte))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A single 8-byte command frame.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandFrame {
    bytes: [u8; FRAME_LEN],
}

impl CommandFrame {
    /// Encode a command frame.
    ///
    /// Without a parameter the opcode must be exactly 8 characters; with a
    /// parameter it must be exactly 4 characters and the parameter must fit
    /// in 4 hex digits.
    pub fn encode(opcode: &str, param: Option<u32>) -> Result<Self> {
        if !opcode
            .bytes()
            .all(|b| b.is_ascii_alphanumeric())
        {
            return Err(Error::InvalidArgument(format!(
                "opcode {opcode:?} must be ASCII alphanumeric"
            )));
        }

        let text = match param {
            None if opcode.len() == FRAME_LEN => opcode.to_string(),
            None => {
                return Err(Error::InvalidArgument(format!(
                    "opcode {opcode:?} must be exactly {FRAME_LEN} characters"
                )));
            },
            Some(_) if opcode.len() != 4 => {
                return Err(Error::InvalidArgument(format!(
                    "opcode {opcode:?} must be exactly 4 characters when followed by an address"
                )));
            },
            Some(value) => format!("{opcode}{}", encode_hex16(value)?),
        };

        Self::from_ascii(text.as_bytes())
    }

    fn from_ascii(text: &[u8]) -> Result<Self> {
        let bytes: [u8; FRAME_LEN] = text
            .try_into()
            .map_err(|_| {
                Error::InvalidArgument(format!(
                    "frame must be {FRAME_LEN} bytes, got {}",
                    text.len()
                ))
            })?;
        Ok(Self { bytes })
    }

    #[cfg(test)]
    pub(crate) fn from_raw(bytes: [u8; FRAME_LEN]) -> Self {
        Self { bytes }
    }

    fn fixed(opcode: Opcode) -> Self {
        let mut bytes = [0u8; FRAME_LEN];
        bytes.copy_from_slice(
            opcode
                .mnemonic()
                .as_bytes(),
        );
        Self { bytes }
    }

    fn addressed(opcode: Opcode, address: u16) -> Self {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[..4].copy_from_slice(
            opcode
                .mnemonic()
                .as_bytes(),
        );
        bytes[4..].copy_from_slice(&hex16(address));
        Self { bytes }
    }

    /// `READINFO`.
    pub fn read_info() -> Self {
        Self::fixed(Opcode::ReadInfo)
    }

    /// `COMPTIME`.
    pub fn compile_time() -> Self {
        Self::fixed(Opcode::CompileTime)
    }

    /// `READHDR0`.
    pub fn read_header() -> Self {
        Self::fixed(Opcode::ReadHeader)
    }

    /// `RDBK` + address.
    pub fn read_block(address: u16) -> Self {
        Self::addressed(Opcode::ReadBlock, address)
    }

    /// `DEVIDSST`.
    pub fn device_id() -> Self {
        Self::fixed(Opcode::DeviceId)
    }

    /// `ESST` + address.
    pub fn erase_sector(address: u16) -> Self {
        Self::addressed(Opcode::EraseSector, address)
    }

    /// `WRST` + page address. Page 0 encodes as `WRST0000`.
    pub fn write_page(address: u16) -> Self {
        Self::addressed(Opcode::WritePage, address)
    }

    /// `RAMON000` or `RAMOFF00`.
    pub fn ram_banking(enabled: bool) -> Self {
        Self::fixed(if enabled {
            Opcode::RamOn
        } else {
            Opcode::RamOff
        })
    }

    /// `WR` + address + value.
    pub fn write_byte(address: u16, value: u8) -> Self {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[..2].copy_from_slice(b"WR");
        bytes[2..6].copy_from_slice(&hex16(address));
        bytes[6..].copy_from_slice(&hex8(value));
        Self { bytes }
    }

    /// One of the `RMWR` frames.
    pub fn ram_write(opcode: Opcode) -> Result<Self> {
        match opcode {
            Opcode::RamWrite2k | Opcode::RamWrite4kLower | Opcode::RamWrite4kUpper => {
                Ok(Self::fixed(opcode))
            },
            other => Err(Error::InvalidArgument(format!(
                "{other} is not a RAM write opcode"
            ))),
        }
    }

    /// Raw frame bytes.
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.bytes
    }

    /// The opcode of this frame, if known.
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_frame(&self.bytes)
    }

    /// The 16-bit address parameter of an addressed frame.
    pub fn address(&self) -> Option<u16> {
        match self.opcode()? {
            Opcode::ReadBlock | Opcode::EraseSector | Opcode::WritePage => {
                parse_hex(&self.bytes[4..])
            },
            Opcode::WriteByte => parse_hex(&self.bytes[2..6]),
            _ => None,
        }
    }
}

impl fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandFrame({self})")
    }
}

impl fmt::Display for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.bytes))
    }
}

/// The 8-byte acknowledgement sent after every accepted command.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AckFrame {
    bytes: [u8; ACK_LEN],
}

impl AckFrame {
    /// Decode an acknowledgement. Exactly 8 bytes are required.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes.len() {
            ACK_LEN => {
                let mut buf = [0u8; ACK_LEN];
                buf.copy_from_slice(bytes);
                Ok(Self { bytes: buf })
            },
            n if n < ACK_LEN => Err(Error::TruncatedResponse {
                expected: ACK_LEN,
                actual: n,
            }),
            n => Err(Error::InvalidArgument(format!(
                "acknowledgement must be {ACK_LEN} bytes, got {n}"
            ))),
        }
    }

    /// Raw acknowledgement bytes.
    pub fn as_bytes(&self) -> &[u8; ACK_LEN] {
        &self.bytes
    }

    /// Whether the device echoed `frame` back verbatim.
    pub fn is_echo_of(&self, frame: &CommandFrame) -> bool {
        &self.bytes == frame.as_bytes()
    }
}

impl fmt::Debug for AckFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AckFrame({:?})", String::from_utf8_lossy(&self.bytes))
    }
}

/// Render a 16-bit value as 4 uppercase, zero-padded hex digits.
pub fn encode_hex16(value: u32) -> Result<String> {
    let value = u16::try_from(value).map_err(|_| {
        Error::InvalidArgument(format!(
            "0x{value:X} does not fit in 4 hex digits"
        ))
    })?;
    Ok(String::from_utf8_lossy(&hex16(value)).into_owned())
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

fn hex16(value: u16) -> [u8; 4] {
    let [hi, lo] = value.to_be_bytes();
    let [a, b] = hex8(hi);
    let [c, d] = hex8(lo);
    [a, b, c, d]
}

fn hex8(value: u8) -> [u8; 2] {
    [
        HEX[usize::from(value >> 4)],
        HEX[usize::from(value & 0x0F)],
    ]
}

fn parse_hex(digits: &[u8]) -> Option<u16> {
    let text = std::str::from_utf8(digits).ok()?;
    u16::from_str_radix(text, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_frames() {
        assert_eq!(CommandFrame::read_info().as_bytes(), b"READINFO");
        assert_eq!(CommandFrame::compile_time().as_bytes(), b"COMPTIME");
        assert_eq!(CommandFrame::read_header().as_bytes(), b"READHDR0");
        assert_eq!(CommandFrame::device_id().as_bytes(), b"DEVIDSST");
        assert_eq!(CommandFrame::ram_banking(true).as_bytes(), b"RAMON000");
        assert_eq!(CommandFrame::ram_banking(false).as_bytes(), b"RAMOFF00");
    }

    #[test]
    fn test_addressed_frames() {
        assert_eq!(CommandFrame::read_block(0x0000).as_bytes(), b"RDBK0000");
        assert_eq!(CommandFrame::read_block(0x1000).as_bytes(), b"RDBK1000");
        assert_eq!(CommandFrame::read_block(0xA000).as_bytes(), b"RDBKA000");
        assert_eq!(CommandFrame::erase_sector(0x7000).as_bytes(), b"ESST7000");
        assert_eq!(CommandFrame::write_page(0).as_bytes(), b"WRST0000");
        assert_eq!(CommandFrame::write_page(0x01F0).as_bytes(), b"WRST01F0");
    }

    #[test]
    fn test_write_byte_frame() {
        assert_eq!(CommandFrame::write_byte(0x2100, 0x03).as_bytes(), b"WR210003");
        assert_eq!(CommandFrame::write_byte(0x0000, 0x0A).as_bytes(), b"WR00000A");
        assert_eq!(CommandFrame::write_byte(0x6000, 0xFF).as_bytes(), b"WR6000FF");
    }

    #[test]
    fn test_ram_write_frames() {
        assert_eq!(
            CommandFrame::ram_write(Opcode::RamWrite2k)
                .unwrap()
                .as_bytes(),
            b"RMWR2k00"
        );
        assert_eq!(
            CommandFrame::ram_write(Opcode::RamWrite4kUpper)
                .unwrap()
                .as_bytes(),
            b"RMWR4kB0"
        );
        assert!(CommandFrame::ram_write(Opcode::ReadInfo).is_err());
    }

    #[test]
    fn test_encode_matches_typed_constructors() {
        assert_eq!(
            CommandFrame::encode("READINFO", None).unwrap(),
            CommandFrame::read_info()
        );
        assert_eq!(
            CommandFrame::encode("RDBK", Some(0x3000)).unwrap(),
            CommandFrame::read_block(0x3000)
        );
        assert_eq!(
            CommandFrame::encode("ESST", Some(0xABCD))
                .unwrap()
                .as_bytes(),
            b"ESSTABCD"
        );
    }

    #[test]
    fn test_encode_rejects_bad_opcodes() {
        assert!(matches!(
            CommandFrame::encode("READINFOX", None),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            CommandFrame::encode("READ", None),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            CommandFrame::encode("READINFO", Some(1)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            CommandFrame::encode("RD K", Some(1)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_encode_rejects_wide_address() {
        assert!(CommandFrame::encode("RDBK", Some(0xFFFF)).is_ok());
        assert!(matches!(
            CommandFrame::encode("RDBK", Some(0x1_0000)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_opcode_identification() {
        assert_eq!(
            Opcode::from_frame(b"READINFO"),
            Some(Opcode::ReadInfo)
        );
        assert_eq!(
            Opcode::from_frame(b"RDBK1000"),
            Some(Opcode::ReadBlock)
        );
        assert_eq!(
            Opcode::from_frame(b"RMWR4kB0"),
            Some(Opcode::RamWrite4kUpper)
        );
        assert_eq!(
            Opcode::from_frame(b"WR400001"),
            Some(Opcode::WriteByte)
        );
        assert_eq!(
            Opcode::from_frame(b"WRST0100"),
            Some(Opcode::WritePage)
        );
        assert_eq!(Opcode::from_frame(b"NOPE0000"), None);
        assert_eq!(Opcode::from_frame(b"RDBK"), None);
    }

    #[test]
    fn test_frame_address() {
        assert_eq!(CommandFrame::read_block(0x5000).address(), Some(0x5000));
        assert_eq!(CommandFrame::write_byte(0x2100, 7).address(), Some(0x2100));
        assert_eq!(CommandFrame::read_info().address(), None);
    }

    #[test]
    fn test_ack_round_trip() {
        let frame = CommandFrame::read_block(0x2000);
        let ack = AckFrame::decode(frame.as_bytes()).unwrap();
        assert_eq!(ack.as_bytes().len(), ACK_LEN);
        assert!(ack.is_echo_of(&frame));
        assert!(!ack.is_echo_of(&CommandFrame::read_block(0x3000)));
    }

    #[test]
    fn test_ack_truncated() {
        match AckFrame::decode(b"RDBK") {
            Err(Error::TruncatedResponse { expected, actual }) => {
                assert_eq!(expected, 8);
                assert_eq!(actual, 4);
            },
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_ack_too_long() {
        assert!(matches!(
            AckFrame::decode(b"READINFOX"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_encode_hex16() {
        assert_eq!(encode_hex16(0).unwrap(), "0000");
        assert_eq!(encode_hex16(0x1000).unwrap(), "1000");
        assert_eq!(encode_hex16(0xbeef).unwrap(), "BEEF");
        assert!(encode_hex16(0x10000).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(CommandFrame::read_block(0x4000).to_string(), "RDBK4000");
    }
}
