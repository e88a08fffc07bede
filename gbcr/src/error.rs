//! Error types for gbcr.

use std::io;
use thiserror::Error;

use crate::flash::ChipId;

/// Result type for gbcr operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for gbcr operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No matching serial interface is present.
    #[error("Device not found")]
    DeviceNotFound,

    /// The serial interface exists but could not be configured.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A frame or page could not be written in full.
    #[error("Write failed: {0}")]
    Write(#[source] io::Error),

    /// Expected bytes did not arrive within the configured read timeout.
    #[error("Timeout: expected {expected} bytes, received {}", received.len())]
    Timeout {
        /// Number of bytes the operation waited for.
        expected: usize,
        /// Bytes that did arrive before the timeout elapsed.
        received: Vec<u8>,
    },

    /// Fewer bytes than the operation's fixed contract.
    #[error("Truncated response: expected {expected} bytes, got {actual}")]
    TruncatedResponse {
        /// Contracted length.
        expected: usize,
        /// Length actually available.
        actual: usize,
    },

    /// The flash chip did not identify as an allowed part.
    #[error("Device ID mismatch: got {actual}")]
    DeviceIdMismatch {
        /// ID reported by the device.
        actual: ChipId,
    },

    /// The device reported an erase attempt count outside the accepted range.
    #[error("Flash erase failed at 0x{address:04X} after {attempts} attempts")]
    FlashEraseFailed {
        /// Block address that was being erased.
        address: u16,
        /// Attempt count reported by the device.
        attempts: u16,
    },

    /// Read-back after a flash write differs from what was written.
    #[error(
        "Verification failed at 0x{address:04X}: expected 0x{expected:02X}, read 0x{actual:02X}"
    )]
    VerificationFailed {
        /// Absolute cartridge address of the first differing byte.
        address: u16,
        /// Byte that was written.
        expected: u8,
        /// Byte that was read back.
        actual: u8,
    },

    /// Argument out of the encodable range or payload of the wrong size.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The device answered with something the driver was told not to accept.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A flash step was requested out of order or after a fault.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Unsupported cartridge hardware or operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The embedding application asked the operation to stop.
    #[error("Operation interrupted")]
    Interrupted,
}

impl Error {
    /// Whether this error came from the transport rather than the device's answer.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Io(_)
            | Self::Write(_)
            | Self::Timeout { .. }
            | Self::TruncatedResponse { .. }
            | Self::Connection(_)
            | Self::DeviceNotFound => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }
}
