//! jnflash CLI - Command-line tool for programming JN5169 flash through the
//! UART bootloader monitor.
//!
//! ## Features
//!
//! - Write monitor images with sector discovery and marker handover
//! - Scan sector roles without writing
//! - Erase single sectors
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use jnflash::{
    ProtocolVariant, Sector,
    port::{DEFAULT_TIMEOUT, PROGRAMMING_BAUD},
};
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed during this run.
fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

mod commands;
mod config;
mod serial;

use commands::{completions, flash, ports};
use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation or missing setup (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Aborted by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// jnflash - Program JN5169 flash through the UART bootloader monitor.
///
/// Environment variables:
///   JNFLASH_PORT              - Default serial port
///   JNFLASH_BAUD              - Default baud rate (default: 38400)
///   JNFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "jnflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "JNFLASH_PORT")]
    port: Option<String>,

    /// Baud rate of the monitor link [default: 38400].
    #[arg(short, long, global = true, env = "JNFLASH_BAUD")]
    baud: Option<u32>,

    /// Response timeout in milliseconds [default: 5000].
    #[arg(long, global = true, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "JNFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Write a monitor image to flash.
    Flash {
        /// Monitor image file, or `-` to read from stdin.
        image: Option<PathBuf>,

        /// Protocol variant: fixed, scan or dual-sector [default: dual-sector].
        #[arg(long)]
        variant: Option<ProtocolVariant>,

        /// Target sector for the fixed variant [default: 8].
        #[arg(long, value_parser = parse_sector)]
        sector: Option<u8>,
    },

    /// Probe sector roles without erasing or writing.
    Scan {
        /// Protocol variant used for probing (scan or dual-sector).
        #[arg(long)]
        variant: Option<ProtocolVariant>,

        /// Output the result as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Erase one flash sector.
    Erase {
        /// Sector index to erase.
        #[arg(long, value_parser = parse_sector)]
        sector: u8,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions (auto-detected if not specified with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Automatically install completions to your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

/// Parse a sector index and check it addresses flash.
fn parse_sector(s: &str) -> Result<u8, String> {
    let index: u8 = s
        .trim()
        .parse()
        .map_err(|e| format!("invalid sector '{s}': {e}"))?;
    Sector::try_from(index)
        .map(Sector::index)
        .map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
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
        "jnflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    install_interrupt_handler();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}

/// Route Ctrl-C into the library's interruption checker.
///
/// The first Ctrl-C lets the current page finish; a second one exits.
fn install_interrupt_handler() {
    let result = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::Relaxed) {
            std::process::exit(130);
        }
        eprintln!(
            "\n{} Interrupt received, stopping after the current page...",
            style("⚠").yellow()
        );
    });
    if let Err(e) = result {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    jnflash::set_interrupt_checker(was_interrupted);
}

/// Map an error to the process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    if matches!(
        err.downcast_ref::<jnflash::Error>(),
        Some(jnflash::Error::Interrupted { .. })
    ) || was_interrupted()
    {
        return 130;
    }
    1
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Flash {
            image,
            variant,
            sector,
        } => flash::cmd_flash(cli, &mut config, image.as_ref(), *variant, *sector),
        Commands::Scan { variant, json } => flash::cmd_scan(cli, &mut config, *variant, *json),
        Commands::Erase { sector } => flash::cmd_erase(cli, &mut config, *sector),
        Commands::ListPorts { json } => {
            ports::cmd_list_ports(*json);
            Ok(())
        },
        Commands::Completions { shell, install } => {
            if *install {
                completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(
                        "specify a shell type, e.g.: jnflash completions bash \
                         (or use jnflash completions --install)"
                            .to_string(),
                    )
                })?;
                completions::cmd_completions(shell);
                Ok(())
            }
        },
    }
}

/// Get serial port from CLI args, config or interactive selection.
fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };

    let selected = select_serial_port(&options, config)?;

    // Ask to remember if the port was picked by hand
    if !selected.is_known && !cli.non_interactive {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name().to_string())
}

/// Baud rate: CLI/env, then config, then the monitor default.
fn resolve_baud(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config.connection.baud)
        .unwrap_or(PROGRAMMING_BAUD)
}

/// Response timeout: CLI, then config, then the library default.
fn resolve_timeout(cli: &Cli, config: &Config) -> Duration {
    cli.timeout_ms
        .or(config.connection.timeout_ms)
        .map_or(DEFAULT_TIMEOUT, Duration::from_millis)
}
