//! gbcr CLI - dump and flash Game Boy cartridges with the GBCR adapter.
//!
//! ## Features
//!
//! - Board, cartridge header and flash chip inspection
//! - ROM and save RAM dumps
//! - Save RAM restore
//! - Flash cartridge programming and verification
//! - Interactive serial port selection
//! - Environment variable and config file support

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use env_logger::Env;
use gbcr::port::{DEFAULT_BAUD, is_known_baud_rate};
use gbcr::{CartReader, NativePort, RamAddressing, ReadTimeout, SerialConfig, SessionConfig};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;

use commands::dump::{cmd_read_ram, cmd_read_rom};
use commands::flash::{cmd_flash, cmd_verify, cmd_write_ram};
use commands::info::{cmd_header, cmd_info, cmd_list_ports};
use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Default read timeout in milliseconds.
const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Errors that select a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing setup (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// The user cancelled (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// gbcr - dump and flash Game Boy cartridges with the GBCR adapter.
///
/// Environment variables:
///   GBCR_PORT              - Default serial port
///   GBCR_BAUD              - Baud rate (default: 115200)
///   GBCR_TIMEOUT_MS        - Read timeout in milliseconds, 0 waits forever
///   GBCR_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "gbcr")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "For more information, visit: https://github.com/ifilot/gbcr")]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "GBCR_PORT")]
    pub(crate) port: Option<String>,

    /// Baud rate (14400, 115200 or 512000 depending on the board firmware).
    #[arg(short, long, global = true, env = "GBCR_BAUD")]
    pub(crate) baud: Option<u32>,

    /// Read timeout in milliseconds (0 waits forever).
    #[arg(long, global = true, env = "GBCR_TIMEOUT_MS", value_name = "MS")]
    pub(crate) timeout_ms: Option<u64>,

    /// Reject acknowledgements that do not echo the command.
    #[arg(long, global = true)]
    pub(crate) strict_echo: bool,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "GBCR_NON_INTERACTIVE")]
    pub(crate) non_interactive: bool,

    /// Confirm port selection even for auto-detected adapters.
    #[arg(long, global = true)]
    pub(crate) confirm_port: bool,

    /// Offer all serial ports, not only recognised adapters.
    #[arg(long, global = true)]
    pub(crate) list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// How save RAM sectors are addressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum RamAddressingArg {
    /// 4 KB sectors at 0xA000 and 0xB000.
    Fixed,
    /// Sectors addressed by block index.
    BlockIndexed,
}

impl From<RamAddressingArg> for RamAddressing {
    fn from(arg: RamAddressingArg) -> Self {
        match arg {
            RamAddressingArg::Fixed => RamAddressing::FixedWindow,
            RamAddressingArg::BlockIndexed => RamAddressing::BlockIndexed,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Show board identity, firmware build time and flash chip id.
    Info {
        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Read and decode the cartridge header.
    Header {
        /// Output the header as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Dump the cartridge ROM.
    ReadRom {
        /// Output file.
        #[arg(short, long)]
        output: PathBuf,

        /// Read this many 4 KB blocks from address 0 without bank switching.
        #[arg(long, value_parser = clap::value_parser!(u16).range(1..=16))]
        blocks: Option<u16>,
    },

    /// Dump the cartridge save RAM.
    ReadRam {
        /// Output file.
        #[arg(short, long)]
        output: PathBuf,

        /// Sector addressing used for RAM reads.
        #[arg(long, value_enum, default_value = "fixed")]
        ram_addressing: RamAddressingArg,
    },

    /// Restore a save RAM image.
    WriteRam {
        /// Save image, exactly the cartridge's RAM size.
        file: PathBuf,
    },

    /// Program a flash cartridge (up to 32 KB).
    Flash {
        /// ROM image to program.
        file: PathBuf,

        /// Also accept this flash chip id (4 hex digits, repeatable).
        #[arg(long, value_name = "ID")]
        allow_chip: Vec<String>,
    },

    /// Compare the cartridge ROM with a reference image.
    Verify {
        /// Reference image.
        file: PathBuf,
    },
}

fn main() {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    gbcr::set_interrupt_checker(was_interrupted);

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "gbcr v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::ListPorts { json } => cmd_list_ports(*json),
        Commands::Info { json } => cmd_info(cli, &mut config, *json),
        Commands::Header { json } => cmd_header(cli, &mut config, *json),
        Commands::ReadRom { output, blocks } => cmd_read_rom(cli, &mut config, output, *blocks),
        Commands::ReadRam {
            output,
            ram_addressing,
        } => cmd_read_ram(cli, &mut config, output, (*ram_addressing).into()),
        Commands::WriteRam { file } => cmd_write_ram(cli, &mut config, file),
        Commands::Flash { file, allow_chip } => cmd_flash(cli, &mut config, file, allow_chip),
        Commands::Verify { file } => cmd_verify(cli, &mut config, file),
    }
}

/// Map an error to the process exit code.
pub(crate) fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return match cli_err {
                CliError::Usage(_) => 2,
                CliError::Cancelled(_) => 130,
            };
        }
        if let Some(gbcr::Error::Interrupted) = cause.downcast_ref::<gbcr::Error>() {
            return 130;
        }
    }
    1
}

/// Get serial port from CLI args or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli
            .port
            .clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;

    if !selected.is_known && !cli.non_interactive && cli.port.is_none() {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected
        .port
        .name)
}

/// Session settings from flags, then config, then defaults.
pub(crate) fn session_config(cli: &Cli, config: &Config) -> SessionConfig {
    let timeout_ms = cli
        .timeout_ms
        .or(config
            .link
            .timeout_ms)
        .unwrap_or(DEFAULT_TIMEOUT_MS);
    SessionConfig::default()
        .with_timeout(ReadTimeout::from_millis(timeout_ms))
        .with_strict_echo(
            cli.strict_echo
                || config
                    .link
                    .strict_echo,
        )
}

/// Resolve the port and open a reader on it.
pub(crate) fn open_reader(cli: &Cli, config: &mut Config) -> Result<CartReader<NativePort>> {
    let port = get_port(cli, config)?;
    let baud = cli
        .baud
        .or(config
            .port
            .connection
            .baud)
        .unwrap_or(DEFAULT_BAUD);
    if !is_known_baud_rate(baud) {
        warn!("{baud} baud is not used by any known adapter firmware");
    }

    if !cli.quiet {
        eprintln!(
            "{} Using port {} @ {baud} baud",
            style("🔌").cyan(),
            style(&port).green()
        );
    }

    let serial = SerialConfig::new(port.as_str(), baud);
    let reader = CartReader::open(&serial, session_config(cli, config))
        .with_context(|| format!("Failed to open {port}"))?;
    ensure_not_interrupted()?;
    Ok(reader)
}

/// Fail with a cancellation once Ctrl-C was pressed.
pub(crate) fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

/// Byte progress bar on stderr, hidden in quiet or non-TTY mode.
pub(crate) fn progress_bar(cli: &Cli, total: u64) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            )
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}
