//! Port listing and read-only inspection commands.

use {
    anyhow::{Context, Result},
    console::style,
    gbcr::{
        CartridgeHeader,
        device::{auto_detect_port, detect_ports},
    },
};

use crate::{Cli, config::Config, open_reader};

/// Human-readable byte size.
pub(crate) fn format_size(bytes: usize) -> String {
    match bytes {
        0 => "none".to_string(),
        b if b >= 1024 * 1024 && b % (1024 * 1024) == 0 => format!("{} MB", b / (1024 * 1024)),
        b if b >= 1024 && b % 1024 == 0 => format!("{} KB", b / 1024),
        b => format!("{b} bytes"),
    }
}

fn yes_no(value: bool) -> console::StyledObject<&'static str> {
    if value {
        style("yes").green()
    } else {
        style("no").red()
    }
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = detect_ports();

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": detected,
            }
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output)?
        );
        return Ok(());
    }

    eprintln!(
        "{}",
        style("Available serial ports")
            .bold()
            .underlined()
    );

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &detected {
        let device_type = if port
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
        } else {
            String::new()
        };

        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };

        let product = port
            .product
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{device_type}{vid_pid}{product}",
            style("•").green(),
            style(&port.name).cyan(),
        );
    }

    if let Ok(auto_port) = auto_detect_port() {
        eprintln!(
            "\n{} Auto-detected adapter: {}",
            style("→")
                .green()
                .bold(),
            style(&auto_port.name)
                .cyan()
                .bold()
        );
    }

    Ok(())
}

/// Board identity, firmware build time and flash chip id.
pub(crate) fn cmd_info(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let mut reader = open_reader(cli, config)?;

    let board = reader
        .read_board_info()
        .context("Failed to read board info")?;
    let compiled = reader
        .read_compile_time()
        .context("Failed to read firmware build time")?;
    let chip = reader
        .read_device_id()
        .context("Failed to read flash chip id")?;
    reader.close()?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "board": board,
                "compile_time": compiled,
                "chip_id": format!("0x{:04X}", chip.as_u16()),
                "chip_name": chip.part_name(),
            }
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output)?
        );
        return Ok(());
    }

    eprintln!(
        "\n{}",
        style("Board")
            .bold()
            .underlined()
    );
    eprintln!("  Identifier: {}", style(&board).cyan());
    eprintln!("  Chipset:    {}", board.chipset);
    if let Some(version) = board.version {
        eprintln!("  Firmware:   v{version}");
    }
    eprintln!("  Built:      {compiled}");
    eprintln!("  Flash chip: {chip}");

    Ok(())
}

fn print_header(header: &CartridgeHeader) {
    eprintln!(
        "\n{}",
        style("Cartridge header")
            .bold()
            .underlined()
    );
    eprintln!(
        "  Title:     {}",
        style(&header.title)
            .cyan()
            .bold()
    );
    eprintln!(
        "  Type:      0x{:02X} {} ({})",
        header.cartridge_type, header.cartridge_type_name, header.mapper
    );
    eprintln!(
        "  ROM:       {} in {} banks",
        format_size(header.rom_size),
        header.rom_banks
    );
    eprintln!(
        "  RAM:       {} in {} banks",
        format_size(header.ram_size),
        header.ram_banks
    );
    eprintln!("  CGB:       {}", yes_no(header.cgb));
    eprintln!("  SGB:       {}", yes_no(header.sgb));
    eprintln!("  Logo:      {}", yes_no(header.logo_valid));
    eprintln!(
        "  Checksum:  0x{:02X} (computed 0x{:02X}) {}",
        header.header_checksum,
        header.computed_header_checksum,
        yes_no(header.header_checksum_valid())
    );
    eprintln!("  Global:    0x{:04X}", header.global_checksum);
}

/// Read and decode the cartridge header.
pub(crate) fn cmd_header(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let mut reader = open_reader(cli, config)?;
    let header = reader
        .header()
        .context("Failed to read cartridge header")?;
    reader.close()?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "header": header,
                "header_checksum_valid": header.header_checksum_valid(),
            }
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output)?
        );
        return Ok(());
    }

    print_header(&header);
    Ok(())
}
