//! Configuration file support for gbcr.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (GBCR_*)
//! 3. Local config file (./gbcr.toml or ./gbcr_ports.toml)
//! 4. Global config file (~/.config/gbcr/config.toml)

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Local configuration file name.
pub(crate) const LOCAL_CONFIG: &str = "gbcr.toml";

/// Local file holding remembered ports.
pub(crate) const LOCAL_PORTS: &str = "gbcr_ports.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Extra USB devices accepted as adapters.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Link session settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Read timeout in milliseconds, 0 waits forever.
    pub timeout_ms: Option<u64>,
    /// Reject acknowledgements that do not echo the command.
    #[serde(default)]
    pub strict_echo: bool,
}

/// Flash programming settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Additional chip ids to accept, as 4 hex digits (e.g. "BFB5").
    #[serde(default)]
    pub allow_chip: Vec<String>,
    /// Erase attempt ceiling.
    pub max_erase_attempts: Option<u16>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Link configuration.
    #[serde(default)]
    pub link: LinkConfig,
    /// Flash configuration.
    #[serde(default)]
    pub flash: FlashConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        if let Some(ports_config) = Self::load_ports_config() {
            config.merge_ports(ports_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse TOML config {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Remembered ports: local `gbcr_ports.toml` first, then the global `ports.toml`.
    fn load_ports_config() -> Option<PortConfig> {
        let candidates = std::iter::once(PathBuf::from(LOCAL_PORTS))
            .chain(Self::global_config_dir().map(|dir| dir.join("ports.toml")));

        for path in candidates {
            if !path.exists() {
                continue;
            }
            match fs::read_to_string(&path)
                .ok()
                .and_then(|content| toml::from_str(&content).ok())
            {
                Some(config) => {
                    debug!("Loaded ports config from {}", path.display());
                    return Some(config);
                },
                None => warn!("Ignoring unreadable ports config {}", path.display()),
            }
        }

        None
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "gbcr").map(|dirs| {
            dirs.config_dir()
                .to_path_buf()
        })
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        self.merge_ports(other.port);

        if other
            .link
            .timeout_ms
            .is_some()
        {
            self.link
                .timeout_ms = other
                .link
                .timeout_ms;
        }
        if other
            .link
            .strict_echo
        {
            self.link
                .strict_echo = true;
        }

        for chip in other
            .flash
            .allow_chip
        {
            if !self
                .flash
                .allow_chip
                .contains(&chip)
            {
                self.flash
                    .allow_chip
                    .push(chip);
            }
        }
        if other
            .flash
            .max_erase_attempts
            .is_some()
        {
            self.flash
                .max_erase_attempts = other
                .flash
                .max_erase_attempts;
        }
    }

    fn merge_ports(&mut self, other: PortConfig) {
        if other
            .connection
            .serial
            .is_some()
        {
            self.port
                .connection
                .serial = other
                .connection
                .serial;
        }
        if other
            .connection
            .baud
            .is_some()
        {
            self.port
                .connection
                .baud = other
                .connection
                .baud;
        }
        for device in other.usb_device {
            if !self
                .port
                .usb_device
                .contains(&device)
            {
                self.port
                    .usb_device
                    .push(device);
            }
        }
    }

    /// Save USB device for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let device = UsbDevice { vid, pid };

        if self
            .port
            .usb_device
            .contains(&device)
        {
            return Ok(());
        }

        // Local file when the project already has one, global otherwise
        let path = if Path::new(LOCAL_PORTS).exists() || Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_PORTS)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("ports.toml")
        } else {
            PathBuf::from(LOCAL_PORTS)
        };

        self.port
            .usb_device
            .push(device);

        let content = toml::to_string_pretty(&self.port)?;
        fs::write(&path, content)?;
        info!("Saved USB device to {}", path.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(
            config
                .port
                .connection
                .serial
                .is_none()
        );
        assert!(
            config
                .port
                .usb_device
                .is_empty()
        );
        assert!(
            config
                .link
                .timeout_ms
                .is_none()
        );
        assert!(
            !config
                .link
                .strict_echo
        );
        assert!(
            config
                .flash
                .allow_chip
                .is_empty()
        );
    }

    #[test]
    fn test_usb_device_matches() {
        let device = UsbDevice {
            vid: 0x2341,
            pid: 0x0036,
        };
        assert!(device.matches(0x2341, 0x0036));
        assert!(!device.matches(0x2341, 0x8036));
        assert!(!device.matches(0x0403, 0x0036));
    }

    #[test]
    fn test_config_merge_overrides_set_values() {
        let mut base = Config::default();
        base.port
            .connection
            .baud = Some(14_400);
        base.link
            .timeout_ms = Some(500);

        let mut other = Config::default();
        other
            .port
            .connection
            .serial = Some("/dev/ttyACM0".to_string());
        other
            .port
            .connection
            .baud = Some(512_000);
        other
            .flash
            .max_erase_attempts = Some(0x800);

        base.merge(other);

        assert_eq!(
            base.port
                .connection
                .serial
                .as_deref(),
            Some("/dev/ttyACM0")
        );
        assert_eq!(
            base.port
                .connection
                .baud,
            Some(512_000)
        );
        assert_eq!(
            base.link
                .timeout_ms,
            Some(500)
        );
        assert_eq!(
            base.flash
                .max_erase_attempts,
            Some(0x800)
        );
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.port
            .connection
            .serial = Some("/dev/ttyUSB0".to_string());

        base.merge(Config::default());

        assert_eq!(
            base.port
                .connection
                .serial
                .as_deref(),
            Some("/dev/ttyUSB0")
        );
    }

    #[test]
    fn test_config_merge_deduplicates_lists() {
        let mut base = Config::default();
        base.port
            .usb_device
            .push(UsbDevice {
                vid: 0x1A86,
                pid: 0x7523,
            });
        base.flash
            .allow_chip
            .push("BFB5".to_string());

        let mut other = Config::default();
        other
            .port
            .usb_device
            .push(UsbDevice {
                vid: 0x1A86,
                pid: 0x7523,
            });
        other
            .port
            .usb_device
            .push(UsbDevice {
                vid: 0x10C4,
                pid: 0xEA60,
            });
        other
            .flash
            .allow_chip
            .push("BFB5".to_string());
        other
            .flash
            .allow_chip
            .push("01A4".to_string());

        base.merge(other);
        assert_eq!(
            base.port
                .usb_device
                .len(),
            2
        );
        assert_eq!(base.flash.allow_chip, vec!["BFB5", "01A4"]);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[port.connection]
serial = "/dev/ttyACM0"
baud = 512000

[[port.usb_device]]
vid = 9025
pid = 54

[link]
timeout_ms = 0
strict_echo = true

[flash]
allow_chip = ["01A4"]
max_erase_attempts = 2048
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config
                .port
                .connection
                .serial
                .as_deref(),
            Some("/dev/ttyACM0")
        );
        assert_eq!(
            config
                .port
                .connection
                .baud,
            Some(512_000)
        );
        assert_eq!(config.port.usb_device[0].vid, 0x2341);
        assert_eq!(
            config
                .link
                .timeout_ms,
            Some(0)
        );
        assert!(
            config
                .link
                .strict_echo
        );
        assert_eq!(config.flash.allow_chip, vec!["01A4"]);
        assert_eq!(
            config
                .flash
                .max_erase_attempts,
            Some(2048)
        );
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config: Config = toml::from_str("[link]\nstrict_echo = true\n").unwrap();
        assert!(
            config
                .port
                .connection
                .serial
                .is_none()
        );
        assert!(
            config
                .link
                .strict_echo
        );
        assert!(
            config
                .link
                .timeout_ms
                .is_none()
        );
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("gbcr.toml");
        fs::write(
            &path,
            "[port.connection]\nserial = \"/dev/ttyUSB1\"\n[link]\ntimeout_ms = 250\n",
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(
            config
                .port
                .connection
                .serial
                .as_deref(),
            Some("/dev/ttyUSB1")
        );
        assert_eq!(
            config
                .link
                .timeout_ms,
            Some(250)
        );
    }

    #[test]
    fn test_load_from_path_invalid_toml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("gbcr.toml");
        fs::write(&path, "invalid toml [[[").unwrap();

        let config = Config::load_from_path(&path);
        assert!(
            config
                .port
                .connection
                .serial
                .is_none()
        );
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/gbcr.toml"));
        assert!(
            config
                .port
                .connection
                .serial
                .is_none()
        );
    }

    #[test]
    fn test_global_config_path_names_gbcr() {
        if let Some(p) = Config::global_config_path() {
            let p = p.to_string_lossy();
            assert!(p.contains("gbcr"));
            assert!(p.ends_with("config.toml"));
        }
    }
}
