//! Adapter identity: board string and firmware build time.

use std::fmt;

use crate::error::{Error, Result};
use crate::protocol::{BOARD_INFO_LEN, COMPILE_TIME_LEN};

/// Microcontroller on the adapter board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Chipset {
    /// ATmega32u4 with native USB (`-AVR-` boards).
    Atmega32u4,
    /// AT90S8515 behind an FTDI bridge (`-8515-` boards).
    At90s8515,
    /// Anything else.
    Unknown,
}

impl fmt::Display for Chipset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atmega32u4 => write!(f, "ATmega32u4"),
            Self::At90s8515 => write!(f, "AT90S8515"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Firmware version `major.minor.patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FirmwareVersion {
    /// Major version.
    pub major: u16,
    /// Minor version.
    pub minor: u16,
    /// Patch version.
    pub patch: u16,
}

impl FirmwareVersion {
    /// Create a version.
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    fn parse(text: &str) -> Option<Self> {
        let mut parts = text
            .split('.')
            .map(|p| p.parse::<u16>());
        let major = parts.next()?.ok()?;
        let minor = parts.next()?.ok()?;
        let patch = parts.next()?.ok()?;
        parts
            .next()
            .is_none()
            .then_some(Self::new(major, minor, patch))
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Board identity returned by `READINFO`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BoardInfo {
    /// Raw 16-byte payload.
    pub raw: Vec<u8>,
    /// Identifier string without NUL padding, e.g. `GBCR-AVR-V2.0.0`.
    pub identifier: String,
    /// Adapter microcontroller.
    pub chipset: Chipset,
    /// Firmware version, when the identifier carries one.
    pub version: Option<FirmwareVersion>,
}

impl BoardInfo {
    /// Interpret the `READINFO` payload.
    ///
    /// Only the length is enforced. Identifiers that do not follow the
    /// `NAME-CHIP-Vx.y.z` layout yield [`Chipset::Unknown`] and no version.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() != BOARD_INFO_LEN {
            return Err(Error::TruncatedResponse {
                expected: BOARD_INFO_LEN,
                actual: raw.len(),
            });
        }

        let identifier = nul_trimmed(raw);
        let mut fields = identifier.split('-');
        let _name = fields.next();
        let chipset = match fields.next() {
            Some("AVR") => Chipset::Atmega32u4,
            Some("8515") => Chipset::At90s8515,
            _ => Chipset::Unknown,
        };
        let version = fields
            .next()
            .and_then(|v| v.strip_prefix(|c: char| c.eq_ignore_ascii_case(&'V')))
            .and_then(FirmwareVersion::parse);

        Ok(Self {
            raw: raw.to_vec(),
            identifier,
            chipset,
            version,
        })
    }
}

impl fmt::Display for BoardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier)
    }
}

/// Firmware build timestamp returned by `COMPTIME`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CompileTime {
    /// Build date, e.g. `Mar 14 2021`.
    pub date: String,
    /// Build time, e.g. `12:34:56`.
    pub time: String,
}

impl CompileTime {
    /// Interpret the 32-byte payload: a 16-byte date chunk then a 16-byte
    /// time chunk, each NUL padded.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() != COMPILE_TIME_LEN {
            return Err(Error::TruncatedResponse {
                expected: COMPILE_TIME_LEN,
                actual: raw.len(),
            });
        }
        let (date, time) = raw.split_at(COMPILE_TIME_LEN / 2);
        Ok(Self {
            date: nul_trimmed(date),
            time: nul_trimmed(time),
        })
    }
}

impl fmt::Display for CompileTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date, self.time)
    }
}

fn nul_trimmed(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end])
        .trim()
        .to_string()
}
