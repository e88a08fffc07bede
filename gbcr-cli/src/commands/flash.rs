//! Flash programming, verification and save RAM restore.

use anyhow::{Context, Result, bail};
use console::style;
use gbcr::flash::MAX_IMAGE_SIZE;
use gbcr::protocol::BLOCK_SIZE;
use gbcr::{ChipId, FlashGate, FlashSession};
use std::fs;
use std::path::Path;

use super::info::format_size;
use crate::{Cli, CliError, config::Config, ensure_not_interrupted, open_reader, progress_bar};

fn read_input(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Default gate extended with chip ids from config and flags.
pub(crate) fn build_gate(config: &Config, extra: &[String]) -> Result<FlashGate> {
    let mut gate = FlashGate::default();
    for id in config
        .flash
        .allow_chip
        .iter()
        .chain(extra)
    {
        let chip: ChipId = id
            .parse()
            .map_err(|e| CliError::Usage(format!("Invalid --allow-chip value: {e}")))?;
        gate = gate.allow(chip);
    }
    if let Some(max) = config
        .flash
        .max_erase_attempts
    {
        gate = gate.with_max_erase_attempts(max);
    }
    Ok(gate)
}

/// First differing byte as `(offset, expected, actual)`.
pub(crate) fn first_mismatch(expected: &[u8], actual: &[u8]) -> Option<(usize, u8, u8)> {
    expected
        .iter()
        .zip(actual)
        .position(|(e, a)| e != a)
        .map(|offset| (offset, expected[offset], actual[offset]))
}

/// Program a flash cartridge.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &mut Config,
    file: &Path,
    allow_chip: &[String],
) -> Result<()> {
    let image = read_input(file)?;
    if image.is_empty() || image.len() > MAX_IMAGE_SIZE {
        bail!(
            "{} is {} bytes; flash images must be 1..={MAX_IMAGE_SIZE} bytes",
            file.display(),
            image.len()
        );
    }
    let gate = build_gate(config, allow_chip)?;

    if !cli.quiet {
        eprintln!(
            "{} Loaded {} ({})",
            style("📦").cyan(),
            style(file.display()).yellow(),
            format_size(image.len())
        );
    }

    let reader = open_reader(cli, config)?;
    let mut session = FlashSession::with_gate(reader, gate);

    let pb = progress_bar(cli, image.len() as u64);
    let result = session.program_image(&image, &mut |done: usize, total: usize| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
    });
    pb.finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            ensure_not_interrupted()?;
            return Err(e).with_context(|| format!("Flashing stopped in state {}", session.state()));
        },
    };
    session
        .into_reader()
        .close()?;

    if !cli.quiet {
        eprintln!("{} Flash chip {}", style("ℹ").blue(), report.chip);
        for erase in &report.erases {
            eprintln!(
                "    {} block 0x{:04X} erased after {} polls",
                style("•").dim(),
                erase.address,
                erase.attempts
            );
        }
        eprintln!(
            "\n{} Programmed and verified {}",
            style("🎉")
                .green()
                .bold(),
            format_size(report.bytes_written)
        );
    }

    Ok(())
}

/// Restore a save RAM image.
pub(crate) fn cmd_write_ram(cli: &Cli, config: &mut Config, file: &Path) -> Result<()> {
    let data = read_input(file)?;

    let mut reader = open_reader(cli, config)?;
    let header = reader
        .header()
        .context("Failed to read cartridge header")?;

    if !cli.quiet {
        eprintln!(
            "{} Writing {} to {} save RAM",
            style("💾").cyan(),
            format_size(data.len()),
            style(&header.title).cyan()
        );
    }

    reader
        .write_ram_image(&header, &data)
        .context("Failed to write save RAM")?;
    reader.close()?;

    if !cli.quiet {
        eprintln!(
            "{} Save RAM restored",
            style("✓")
                .green()
                .bold()
        );
    }
    Ok(())
}

/// Read the cartridge back and compare it with a reference image.
pub(crate) fn cmd_verify(cli: &Cli, config: &mut Config, file: &Path) -> Result<()> {
    let expected = read_input(file)?;
    if expected.is_empty() {
        bail!("{} is empty", file.display());
    }

    let mut reader = open_reader(cli, config)?;
    let pb = progress_bar(cli, expected.len() as u64);

    let mut actual = if expected.len() <= MAX_IMAGE_SIZE {
        let blocks = expected
            .len()
            .div_ceil(BLOCK_SIZE);
        reader
            .read_full_image(blocks, &mut |done: usize, _total: usize| {
                pb.set_position(done as u64);
            })
            .context("Failed to read cartridge image")?
    } else {
        let header = reader
            .header()
            .context("Failed to read cartridge header")?;
        reader
            .read_rom(&header, &mut |done: usize, _total: usize| pb.set_position(done as u64))
            .context("Failed to read ROM")?
    };
    pb.finish_and_clear();
    reader.close()?;

    if actual.len() < expected.len() {
        bail!(
            "Cartridge holds {} but the reference image is {}",
            format_size(actual.len()),
            format_size(expected.len())
        );
    }
    actual.truncate(expected.len());

    if let Some((offset, want, got)) = first_mismatch(&expected, &actual) {
        let differing = expected
            .iter()
            .zip(&actual)
            .filter(|(e, a)| e != a)
            .count();
        bail!(
            "Mismatch at offset 0x{offset:06X}: expected 0x{want:02X}, read 0x{got:02X} ({differing} bytes differ)"
        );
    }

    if !cli.quiet {
        eprintln!(
            "{} {} matches the cartridge",
            style("✓")
                .green()
                .bold(),
            style(file.display()).yellow()
        );
    }
    Ok(())
}
