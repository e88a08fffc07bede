//! # gbcr
//!
//! A host-side driver for the GBCR Game Boy cartridge reader/flasher.
//!
//! The adapter plugs into a cartridge slot and talks over a serial line using
//! fixed 8-byte ASCII commands. Every command is acknowledged with 8 bytes and
//! followed by a payload whose length the opcode fixes. This crate provides:
//!
//! - the command/acknowledgement codec
//! - an exact-length link session over any [`Port`]
//! - cartridge addressing, header parsing and bank switching
//! - ROM, RAM and identity reads through [`CartReader`]
//! - the erase/program/verify state machine for SST39SF0x0 flash carts
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use gbcr::{CartReader, SerialConfig, SessionConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let serial = SerialConfig::new("/dev/ttyACM0", 115_200);
//!     let mut reader = CartReader::open(&serial, SessionConfig::default())?;
//!
//!     println!("Board: {}", reader.read_board_info()?);
//!     let header = reader.header()?;
//!     let rom = reader.read_rom(&header, &mut |done, total| {
//!         println!("{done}/{total}");
//!     })?;
//!     std::fs::write("cart.gb", rom)?;
//!
//!     reader.close()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod board;
pub mod cartridge;
pub mod device;
pub mod error;
pub mod flash;
pub mod link;
pub mod port;
pub mod protocol;
pub mod reader;

#[cfg(test)]
pub(crate) mod sim;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by blocking reads and long
/// library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    board::{BoardInfo, Chipset, CompileTime, FirmwareVersion},
    cartridge::{CartridgeHeader, Mapper, RamAddressing, RomLocation},
    device::{DetectedPort, DeviceKind, KnownAdapters},
    error::{Error, Result},
    flash::{ChipId, EraseResult, FlashGate, FlashReport, FlashSession, FlashState},
    link::{LinkSession, ReadTimeout, SessionConfig},
    port::{Port, PortEnumerator, PortInfo, PortMatcher, SerialConfig, UsbId},
    protocol::{AckFrame, CommandFrame, Opcode},
    reader::CartReader,
};
