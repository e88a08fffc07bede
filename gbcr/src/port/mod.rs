//! Port abstraction for serial communication with the adapter.
//!
//! The protocol layer never talks to `serialport` directly. It is written
//! against the [`Port`] trait so the same code runs over a real serial device
//! and over a simulated adapter in tests.
//!
//! ```text
//! +------------------+     +------------------+
//! |   CartReader /   |     |   CartReader /   |
//! |   FlashSession   |     |   FlashSession   |
//! +--------+---------+     +--------+---------+
//!          |                        |
//!          v                        v
//! +--------+---------+     +--------+---------+
//! |   LinkSession    |     |   LinkSession    |
//! +--------+---------+     +--------+---------+
//!          |                        |
//!          v                        v
//! +--------+---------+     +--------+---------+
//! |    NativePort    |     | simulated adapter|
//! |   (serialport)   |     |     (tests)      |
//! +------------------+     +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use gbcr::port::Port;
//!
//! fn example<P: Port>(port: &mut P) -> gbcr::Result<()> {
//!     port.write_all_bytes(b"READINFO")?;
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};

/// Baud rate used by current adapter firmware.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Baud rates observed across adapter revisions.
pub const KNOWN_BAUD_RATES: &[u32] = &[14_400, 115_200, 512_000];

/// Whether some adapter firmware is known to run at `baud_rate`.
pub fn is_known_baud_rate(baud_rate: u32) -> bool {
    KNOWN_BAUD_RATES.contains(&baud_rate)
}

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout of a single port call.
    pub timeout: Duration,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_millis(100),
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
    /// Software flow control (XON/XOFF).
    Software,
}

/// Serial port information.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Unified port trait for serial communication.
pub trait Port: Read + Write + Send {
    /// Set the timeout of a single read/write call.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Clear input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf).map_err(Error::Write)?;
        std::io::Write::flush(self).map_err(Error::Write)?;
        Ok(())
    }
}

/// Strategy deciding whether an enumerated port is the adapter.
///
/// Discovery is injected through this trait so the protocol core never
/// hardcodes USB identifiers.
pub trait PortMatcher {
    /// Returns `true` if `port` should be used.
    fn matches(&self, port: &PortInfo) -> bool;
}

impl<F> PortMatcher for F
where
    F: Fn(&PortInfo) -> bool,
{
    fn matches(&self, port: &PortInfo) -> bool {
        self(port)
    }
}

/// USB vendor/product pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UsbId {
    /// USB vendor ID.
    pub vid: u16,
    /// USB product ID.
    pub pid: u16,
}

impl UsbId {
    /// Create a new USB identifier.
    pub const fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }
}

impl PortMatcher for UsbId {
    fn matches(&self, port: &PortInfo) -> bool {
        port.vid == Some(self.vid) && port.pid == Some(self.pid)
    }
}

/// Trait for listing available serial ports.
///
/// This is separated from `Port` because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;

    /// Find ports matching the given VID/PID.
    fn find_by_vid_pid(vid: u16, pid: u16) -> Result<Vec<PortInfo>> {
        let id = UsbId::new(vid, pid);
        Ok(Self::list_ports()?
            .into_iter()
            .filter(|p| id.matches(p))
            .collect())
    }

    /// Resolve the first port accepted by `matcher`.
    fn resolve<M: PortMatcher + ?Sized>(matcher: &M) -> Result<PortInfo> {
        Self::list_ports()?
            .into_iter()
            .find(|p| matcher.matches(p))
            .ok_or(Error::DeviceNotFound)
    }
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_baud_rates() {
        assert!(is_known_baud_rate(DEFAULT_BAUD));
        assert!(is_known_baud_rate(14_400));
        assert!(is_known_baud_rate(512_000));
        assert!(!is_known_baud_rate(9600));
    }

    struct FixedEnumerator;

    impl PortEnumerator for FixedEnumerator {
        fn list_ports() -> Result<Vec<PortInfo>> {
            Ok(vec![
                PortInfo {
                    name: "/dev/ttyS0".into(),
                    vid: None,
                    pid: None,
                    manufacturer: None,
                    product: None,
                    serial_number: None,
                },
                PortInfo {
                    name: "/dev/ttyACM0".into(),
                    vid: Some(0x2341),
                    pid: Some(0x0036),
                    manufacturer: Some("Arduino LLC".into()),
                    product: None,
                    serial_number: None,
                },
            ])
        }
    }

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.flow_control, FlowControl::None);
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0", 512_000).with_timeout(Duration::from_secs(5));

        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 512_000);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_resolve_with_usb_id() {
        let port = FixedEnumerator::resolve(&UsbId::new(0x2341, 0x0036)).unwrap();
        assert_eq!(port.name, "/dev/ttyACM0");
    }

    #[test]
    fn test_resolve_with_closure() {
        let port = FixedEnumerator::resolve(&|p: &PortInfo| p.name.ends_with("S0")).unwrap();
        assert_eq!(port.name, "/dev/ttyS0");
    }

    #[test]
    fn test_resolve_no_match_is_device_not_found() {
        let err = FixedEnumerator::resolve(&UsbId::new(0x0403, 0x6001)).unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound));
    }

    #[test]
    fn test_find_by_vid_pid() {
        let ports = FixedEnumerator::find_by_vid_pid(0x2341, 0x0036).unwrap();
        assert_eq!(ports.len(), 1);
    }

    #[test]
    fn test_any_of_matcher() {
        let ids = [UsbId::new(0x0403, 0x6001), UsbId::new(0x2341, 0x0036)];
        let port =
            FixedEnumerator::resolve(&|p: &PortInfo| ids.iter().any(|id| id.matches(p))).unwrap();
        assert_eq!(port.vid, Some(0x2341));
    }
}
