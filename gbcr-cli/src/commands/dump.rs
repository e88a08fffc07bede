//! ROM and save RAM dump commands.

use anyhow::{Context, Result, bail};
use console::style;
use gbcr::RamAddressing;
use gbcr::protocol::BLOCK_SIZE;
use std::fs;
use std::path::Path;

use super::info::format_size;
use crate::{Cli, config::Config, open_reader, progress_bar};

fn write_output(cli: &Cli, output: &Path, data: &[u8]) -> Result<()> {
    fs::write(output, data).with_context(|| format!("Failed to write {}", output.display()))?;
    if !cli.quiet {
        eprintln!(
            "{} Wrote {} to {}",
            style("✓")
                .green()
                .bold(),
            format_size(data.len()),
            style(output.display()).yellow()
        );
    }
    Ok(())
}

/// Dump the ROM, either bank by bank from the header or as raw blocks.
pub(crate) fn cmd_read_rom(
    cli: &Cli,
    config: &mut Config,
    output: &Path,
    blocks: Option<u16>,
) -> Result<()> {
    let mut reader = open_reader(cli, config)?;

    let rom = if let Some(blocks) = blocks {
        let blocks = usize::from(blocks);
        let pb = progress_bar(cli, (blocks * BLOCK_SIZE) as u64);
        let rom = reader
            .read_full_image(blocks, &mut |done: usize, _total: usize| {
                pb.set_position(done as u64);
            })
            .with_context(|| format!("Failed to read {blocks} blocks"))?;
        pb.finish_and_clear();
        rom
    } else {
        let header = reader
            .header()
            .context("Failed to read cartridge header")?;
        if !cli.quiet {
            eprintln!(
                "{} {} ({}, {})",
                style("📦").cyan(),
                style(&header.title)
                    .cyan()
                    .bold(),
                header.mapper,
                format_size(header.rom_size)
            );
        }

        let pb = progress_bar(cli, header.rom_size as u64);
        let rom = reader
            .read_rom(&header, &mut |done: usize, _total: usize| pb.set_position(done as u64))
            .context("Failed to read ROM")?;
        pb.finish_and_clear();
        rom
    };

    reader.close()?;
    write_output(cli, output, &rom)
}

/// Dump the save RAM described by the header.
pub(crate) fn cmd_read_ram(
    cli: &Cli,
    config: &mut Config,
    output: &Path,
    addressing: RamAddressing,
) -> Result<()> {
    let mut reader = open_reader(cli, config)?;
    let header = reader
        .header()
        .context("Failed to read cartridge header")?;

    if header.ram_size == 0 {
        bail!(
            "{} ({}) has no external RAM",
            header.title,
            header.cartridge_type_name
        );
    }
    if !cli.quiet {
        eprintln!(
            "{} Reading {} save RAM ({addressing:?} addressing)",
            style("💾").cyan(),
            format_size(header.ram_size)
        );
    }

    let ram = reader
        .read_ram(&header, addressing)
        .context("Failed to read save RAM")?;
    reader.close()?;
    write_output(cli, output, &ram)
}
