//! Adapter discovery and classification.
//!
//! Discovery is kept out of the protocol core: sessions take a resolved port
//! name. This module classifies enumerated ports by USB identifier and offers
//! a [`PortMatcher`] for the known GBCR boards.

#[cfg(feature = "native")]
use log::{debug, info};
use log::trace;

use crate::error::{Error, Result};
use crate::port::{PortEnumerator, PortInfo, PortMatcher, UsbId};

/// USB identifier of the ATmega32u4 board (native USB CDC).
pub const ATMEGA32U4_USB_ID: UsbId = UsbId::new(0x2341, 0x0036);

/// USB identifier of the FT232R bridge on the AT90S8515 board.
pub const FTDI_USB_ID: UsbId = UsbId::new(0x0403, 0x6001);

/// Known adapter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DeviceKind {
    /// ATmega32u4 based board.
    Atmega32u4,
    /// AT90S8515 board behind an FTDI bridge.
    Ftdi,
    /// Anything else.
    Unknown,
}

const KNOWN_ADAPTERS: &[(UsbId, DeviceKind)] = &[
    (ATMEGA32U4_USB_ID, DeviceKind::Atmega32u4),
    (FTDI_USB_ID, DeviceKind::Ftdi),
];

impl DeviceKind {
    /// Classify a VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_ADAPTERS
            .iter()
            .find(|(id, _)| id.vid == vid && id.pid == pid)
            .map_or(Self::Unknown, |(_, kind)| *kind)
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Atmega32u4 => "GBCR ATmega32u4",
            Self::Ftdi => "GBCR FT232R",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known adapter.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Matches ports that belong to a known GBCR adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct KnownAdapters;

impl PortMatcher for KnownAdapters {
    fn matches(&self, port: &PortInfo) -> bool {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => DeviceKind::from_vid_pid(vid, pid).is_known(),
            _ => false,
        }
    }
}

/// Discovered port with its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// Classified adapter kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl From<PortInfo> for DetectedPort {
    fn from(info: PortInfo) -> Self {
        let device = match (info.vid, info.pid) {
            (Some(vid), Some(pid)) => DeviceKind::from_vid_pid(vid, pid),
            _ => DeviceKind::Unknown,
        };
        Self {
            name: info.name,
            device,
            vid: info.vid,
            pid: info.pid,
            manufacturer: info.manufacturer,
            product: info.product,
            serial: info.serial_number,
        }
    }
}

/// Enumerate ports through `E` and classify them.
pub fn detect_ports_with<E: PortEnumerator>() -> Result<Vec<DetectedPort>> {
    let ports: Vec<DetectedPort> = E::list_ports()?
        .into_iter()
        .map(DetectedPort::from)
        .collect();
    for port in &ports {
        trace!("Found port {} ({:?})", port.name, port.device);
    }
    Ok(ports)
}

/// Pick the adapter among `ports` using `matcher`.
///
/// A 32u4 board is preferred over an FTDI bridge, because FTDI bridges are
/// common on unrelated hardware.
pub fn select_adapter<M: PortMatcher + ?Sized>(
    ports: &[DetectedPort],
    matcher: &M,
) -> Result<DetectedPort> {
    let candidates: Vec<&DetectedPort> = ports
        .iter()
        .filter(|p| matcher.matches(&port_info(p)))
        .collect();

    candidates
        .iter()
        .find(|p| p.device == DeviceKind::Atmega32u4)
        .or_else(|| candidates.first())
        .map(|p| (*p).clone())
        .ok_or(Error::DeviceNotFound)
}

fn port_info(port: &DetectedPort) -> PortInfo {
    PortInfo {
        name: port
            .name
            .clone(),
        vid: port.vid,
        pid: port.pid,
        manufacturer: port
            .manufacturer
            .clone(),
        product: port
            .product
            .clone(),
        serial_number: port
            .serial
            .clone(),
    }
}

/// Detect all serial ports.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    detect_ports_with::<crate::port::NativePortEnumerator>().unwrap_or_else(|e| {
        debug!("Failed to enumerate serial ports: {e}");
        Vec::new()
    })
}

/// Auto-detect a single adapter.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    let port = select_adapter(&detect_ports(), &KnownAdapters)?;
    info!(
        "Auto-detected {}: {}",
        port.device
            .name(),
        port.name
    );
    Ok(port)
}

/// Format a list of detected ports for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let device_info = if port
                .device
                .is_known()
            {
                format!(
                    " [{}]",
                    port.device
                        .name()
                )
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };

            let product_info = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();

            format!("{}{}{}", port.name, device_info, product_info)
        })
        .collect()
}
