//! Interactive serial port selection.
//!
//! Resolution order:
//! - an explicit `--port`
//! - the port remembered in configuration
//! - the single known adapter, picked automatically
//! - a `dialoguer` prompt when several candidates remain
//!
//! Non-interactive mode never prompts and fails with a usage error instead.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    gbcr::{DetectedPort, DeviceKind, device::detect_ports},
    log::{debug, error, info},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Offer all ports, not only recognised adapters.
    pub list_all_ports: bool,
    /// Non-interactive mode (fail instead of prompting).
    pub non_interactive: bool,
    /// Force confirmation even for a single recognised adapter.
    pub confirm_port: bool,
}

/// Result of port selection including whether it was a known device.
pub struct SelectedPort {
    /// The selected port info.
    pub port: DetectedPort,
    /// Whether this port matched a known/configured device.
    pub is_known: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name, detect_ports()));
    }

    if let Some(port_name) = &config
        .port
        .connection
        .serial
    {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name, detect_ports()));
    }

    select_from_ports(options, config, detect_ports())
}

/// Choose among already enumerated `ports`.
pub(crate) fn select_from_ports(
    options: &SerialOptions,
    config: &Config,
    ports: Vec<DetectedPort>,
) -> Result<SelectedPort> {
    if ports.is_empty() {
        return Err(usage_err("No serial ports found. Is the GBCR adapter plugged in?"));
    }

    let known_ports: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| is_known_device(p, config))
        .cloned()
        .collect();

    let selection_ports = if options.list_all_ports || known_ports.is_empty() {
        ports
    } else {
        known_ports
    };

    if options.non_interactive {
        return select_non_interactive_port(selection_ports, config);
    }

    match selection_ports
        .len()
        .cmp(&1)
    {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(selection_ports, config)
        },
        Ordering::Equal => {
            let Some(port) = selection_ports
                .into_iter()
                .next()
            else {
                return Err(usage_err("No serial ports available"));
            };
            let is_known = is_known_device(&port, config);

            if is_known && !options.confirm_port {
                info!(
                    "Auto-selected port: {} [{}]",
                    port.name,
                    port.device
                        .name()
                );
                Ok(SelectedPort { port, is_known })
            } else {
                ensure_interactive_terminal()?;
                confirm_single_port(port)
            }
        },
        Ordering::Less => Err(usage_err("No serial ports available")),
    }
}

fn select_non_interactive_port(
    selection_ports: Vec<DetectedPort>,
    config: &Config,
) -> Result<SelectedPort> {
    // 0 or >1 candidates are setup problems, exactly one is a valid pick
    if selection_ports.len() > 1 {
        return Err(usage_err(
            "Found multiple serial ports; pass --port in non-interactive mode",
        ));
    }
    let port = selection_ports
        .into_iter()
        .next()
        .ok_or_else(|| usage_err("No serial ports available"))?;
    Ok(SelectedPort {
        is_known: is_known_device(&port, config),
        port,
    })
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs an interactive terminal; pass --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err("Port selection prompt failed")
            }
        },
    }
}

/// Find a port by name, keeping the user's name when it is not enumerated.
fn find_port_by_name(name: &str, ports: Vec<DetectedPort>) -> SelectedPort {
    if let Some(port) = ports
        .iter()
        .find(|p| p.name == name)
        .or_else(|| {
            ports
                .iter()
                .find(|p| {
                    p.name
                        .eq_ignore_ascii_case(name)
                })
        })
    {
        return SelectedPort {
            port: port.clone(),
            is_known: port
                .device
                .is_known(),
        };
    }

    SelectedPort {
        port: DetectedPort {
            name: name.to_string(),
            device: DeviceKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        },
        is_known: false,
    }
}

/// Check if a port matches a known adapter (built-in or configured).
fn is_known_device(port: &DetectedPort, config: &Config) -> bool {
    if port
        .device
        .is_known()
    {
        return true;
    }

    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => config
            .port
            .usb_device
            .iter()
            .any(|device| device.matches(vid, pid)),
        _ => false,
    }
}

fn select_port_interactive(mut ports: Vec<DetectedPort>, config: &Config) -> Result<SelectedPort> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );
    eprintln!(
        "{}",
        style("Recognised GBCR adapters are shown in bold").dim()
    );

    // Known adapters first
    ports.sort_by_key(|p| !is_known_device(p, config));

    let port_names: Vec<String> = ports
        .iter()
        .map(|port| {
            let name = if is_known_device(port, config) {
                style(&port.name)
                    .bold()
                    .to_string()
            } else {
                port.name
                    .clone()
            };

            let device_info = if port
                .device
                .is_known()
            {
                format!(
                    " [{}]",
                    style(
                        port.device
                            .name()
                    )
                    .yellow()
                )
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" ({vid:04X}:{pid:04X})")
            } else {
                String::new()
            };

            let product = port
                .product
                .as_ref()
                .map(|p| format!(" - {}", style(p).dim()))
                .unwrap_or_default();

            format!("{name}{device_info}{product}")
        })
        .collect();

    let term_width = console::Term::stderr()
        .size()
        .1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let port_names: Vec<String> = port_names
        .into_iter()
        .map(|n| console::truncate_str(&n, max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the GBCR adapter")
        .items(&port_names)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            let is_known = is_known_device(&port, config);
            Ok(SelectedPort { port, is_known })
        },
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

fn confirm_single_port(port: DetectedPort) -> Result<SelectedPort> {
    let product_info = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}{product_info}?", port.name))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            port,
            is_known: false,
        })
    } else {
        Err(CliError::Cancelled("Port selection cancelled".to_string()).into())
    }
}

/// Ask user if they want to remember this port.
pub fn ask_remember_port(port: &DetectedPort, config: &mut Config) -> Result<()> {
    let (Some(vid), Some(pid)) = (port.vid, port.pid) else {
        return Ok(());
    };
    if config
        .port
        .usb_device
        .iter()
        .any(|device| device.matches(vid, pid))
    {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Remember this device as a GBCR adapter?")
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_usb_device(vid, pid) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UsbDevice;

    fn port(name: &str, id: Option<(u16, u16)>) -> DetectedPort {
        DetectedPort {
            name: name.to_string(),
            device: id.map_or(DeviceKind::Unknown, |(vid, pid)| {
                DeviceKind::from_vid_pid(vid, pid)
            }),
            vid: id.map(|(vid, _)| vid),
            pid: id.map(|(_, pid)| pid),
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    fn non_interactive() -> SerialOptions {
        SerialOptions {
            non_interactive: true,
            ..SerialOptions::default()
        }
    }

    fn usage_message(err: &anyhow::Error) -> String {
        match err.downcast_ref::<CliError>() {
            Some(CliError::Usage(msg)) => msg.clone(),
            other => panic!("expected usage error, got {other:?}"),
        }
    }

    #[test]
    fn test_no_ports_is_usage_error() {
        let err = select_from_ports(&non_interactive(), &Config::default(), Vec::new())
            .err()
            .unwrap();
        assert!(usage_message(&err).contains("No serial ports"));
    }

    #[test]
    fn test_non_interactive_prefers_known_adapter() {
        let ports = vec![
            port("/dev/ttyS0", None),
            port("/dev/ttyACM0", Some((0x2341, 0x0036))),
        ];
        let selected = select_from_ports(&non_interactive(), &Config::default(), ports).unwrap();
        assert_eq!(selected.port.name, "/dev/ttyACM0");
        assert!(selected.is_known);
    }

    #[test]
    fn test_non_interactive_multiple_known_is_usage_error() {
        let ports = vec![
            port("/dev/ttyUSB0", Some((0x0403, 0x6001))),
            port("/dev/ttyACM0", Some((0x2341, 0x0036))),
        ];
        let err = select_from_ports(&non_interactive(), &Config::default(), ports)
            .err()
            .unwrap();
        assert!(usage_message(&err).contains("multiple"));
    }

    #[test]
    fn test_non_interactive_single_unknown_port_is_accepted() {
        let ports = vec![port("/dev/ttyS0", None)];
        let selected = select_from_ports(&non_interactive(), &Config::default(), ports).unwrap();
        assert_eq!(selected.port.name, "/dev/ttyS0");
        assert!(!selected.is_known);
    }

    #[test]
    fn test_configured_usb_device_counts_as_known() {
        let mut config = Config::default();
        config
            .port
            .usb_device
            .push(UsbDevice {
                vid: 0x1A86,
                pid: 0x7523,
            });
        let ch340 = port("/dev/ttyUSB1", Some((0x1A86, 0x7523)));
        assert!(is_known_device(&ch340, &config));
        assert!(!is_known_device(&ch340, &Config::default()));

        let ports = vec![port("/dev/ttyS0", None), ch340];
        let selected = select_from_ports(&non_interactive(), &config, ports).unwrap();
        assert_eq!(selected.port.name, "/dev/ttyUSB1");
    }

    #[test]
    fn test_list_all_ports_keeps_unknown_candidates() {
        let options = SerialOptions {
            list_all_ports: true,
            ..non_interactive()
        };
        let ports = vec![
            port("/dev/ttyS0", None),
            port("/dev/ttyACM0", Some((0x2341, 0x0036))),
        ];
        assert!(select_from_ports(&options, &Config::default(), ports).is_err());
    }

    #[test]
    fn test_find_port_by_name_matches_case_insensitively() {
        let ports = vec![port("COM3", Some((0x2341, 0x0036)))];
        let selected = find_port_by_name("com3", ports);
        assert_eq!(selected.port.name, "COM3");
        assert!(selected.is_known);
    }

    #[test]
    fn test_find_port_by_name_keeps_unlisted_port() {
        let selected = find_port_by_name("/dev/ttyFAKE", Vec::new());
        assert_eq!(selected.port.name, "/dev/ttyFAKE");
        assert_eq!(selected.port.device, DeviceKind::Unknown);
        assert!(!selected.is_known);
    }
}
