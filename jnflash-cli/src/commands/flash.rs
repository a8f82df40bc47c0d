//! Flash, scan, and erase command implementations.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::warn;
use jnflash::{
    FirmwareImage, FlashOptions, FlashReport, MonitorFlasher, NativePort, ProtocolVariant, Sector,
    SerialConfig,
};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::{Cli, CliError, get_port, resolve_baud, resolve_timeout, use_fancy_output, was_interrupted};

/// Image argument that selects standard input.
const STDIN_IMAGE: &str = "-";

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

/// Flash options: CLI, then config, then library defaults.
///
/// A sector only applies to the fixed variant. Passing one on the command
/// line with another variant is a usage error; a config sector is ignored.
fn resolve_options(
    config: &Config,
    variant: Option<ProtocolVariant>,
    sector: Option<u8>,
) -> Result<FlashOptions> {
    let mut options = FlashOptions::default();
    if let Some(variant) = variant.or(config.flash.variant) {
        options.variant = variant;
    }
    let Some(index) = sector.or(config.flash.sector) else {
        return Ok(options);
    };
    let target = Sector::try_from(index).map_err(|e| CliError::Usage(e.to_string()))?;

    if options.variant != ProtocolVariant::Fixed {
        if sector.is_some() {
            return Err(CliError::Usage(format!(
                "--sector only applies to the fixed variant, not {}",
                options.variant
            ))
            .into());
        }
        warn!(
            "Ignoring configured sector {target}: the {} variant scans for its target",
            options.variant
        );
        return Ok(options);
    }

    options.fixed_sector = target;
    Ok(options)
}

/// Resolve the port and open a flasher on it.
fn open_flasher(
    cli: &Cli,
    config: &mut Config,
    options: FlashOptions,
) -> Result<MonitorFlasher<NativePort>> {
    let port = get_port(cli, config)?;
    let baud = resolve_baud(cli, config);
    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {baud} baud ({} protocol)",
            style("🔌").cyan(),
            style(&port).cyan(),
            options.variant
        );
    }

    let serial = SerialConfig::new(port.as_str(), baud).with_timeout(resolve_timeout(cli, config));
    MonitorFlasher::open(&serial, options).with_context(|| format!("Failed to open {port}"))
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(0);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            )
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb
}

/// Run the flasher with a progress bar attached.
fn write_image<R: Read>(
    cli: &Cli,
    flasher: &mut MonitorFlasher<NativePort>,
    image: FirmwareImage<R>,
) -> Result<FlashReport> {
    let pb = progress_bar(cli.quiet);
    pb.set_message("writing");

    let result = flasher.flash(image, |written, total| {
        if total > 0 {
            pb.set_length(total as u64);
        }
        pb.set_position(written as u64);
    });

    match result {
        Ok(report) => {
            pb.finish_with_message("done");
            Ok(report)
        },
        Err(e) => {
            pb.abandon();
            Err(e.into())
        },
    }
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &mut Config,
    image: Option<&PathBuf>,
    variant: Option<ProtocolVariant>,
    sector: Option<u8>,
) -> Result<()> {
    let image = image
        .or(config.flash.image.as_ref())
        .cloned()
        .ok_or_else(|| {
            CliError::Usage(
                "no monitor image given; pass IMAGE or set flash.image in jnflash.toml"
                    .to_string(),
            )
        })?;
    let options = resolve_options(config, variant, sector)?;

    let from_stdin = image.as_os_str() == STDIN_IMAGE;
    if !from_stdin && !image.is_file() {
        return Err(CliError::Usage(format!("image not found: {}", image.display())).into());
    }

    if !cli.quiet {
        eprintln!(
            "{} Loading monitor image {}",
            style("📦").cyan(),
            image.display()
        );
    }

    let mut flasher = open_flasher(cli, config, options)?;
    ensure_not_interrupted()?;

    let report = if from_stdin {
        write_image(cli, &mut flasher, FirmwareImage::from_reader(io::stdin().lock())?)?
    } else {
        write_image(cli, &mut flasher, open_image(&image)?)?
    };

    if !cli.quiet {
        eprintln!("{} {}", style("ℹ").blue(), report.scan);
        for warning in &report.warnings {
            eprintln!("{} {warning}", style("⚠").yellow());
        }
        eprintln!(
            "\n{} Wrote {} bytes in {} pages to sector {}",
            style("🎉").green().bold(),
            report.bytes_written,
            report.pages_written,
            report.scan.target
        );
    }

    Ok(())
}

fn open_image(path: &Path) -> Result<FirmwareImage<io::BufReader<std::fs::File>>> {
    FirmwareImage::from_file(path)
        .with_context(|| format!("Failed to load image {}", path.display()))
}

/// Scan command implementation.
pub(crate) fn cmd_scan(
    cli: &Cli,
    config: &mut Config,
    variant: Option<ProtocolVariant>,
    json: bool,
) -> Result<()> {
    let options = resolve_options(config, variant, None)?;
    if !options.variant.scans() {
        return Err(CliError::Usage(format!(
            "the {} variant does not scan; use scan or dual-sector",
            options.variant
        ))
        .into());
    }

    let mut flasher = open_flasher(cli, config, options)?;
    let result = flasher.scan();
    flasher.close()?;
    let result = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{result}");
    }

    Ok(())
}

/// Erase command implementation.
pub(crate) fn cmd_erase(cli: &Cli, config: &mut Config, sector: u8) -> Result<()> {
    let sector = Sector::try_from(sector).map_err(|e| CliError::Usage(e.to_string()))?;

    let mut flasher = open_flasher(cli, config, FlashOptions::default())?;
    if !cli.quiet {
        eprintln!("{} Erasing sector {sector}", style("🗑").red());
    }
    let response = flasher.erase_sector(sector);
    flasher.close()?;
    let response = response?;

    if !response.is_success() {
        anyhow::bail!(
            "device rejected erase of sector {sector} (status {:#04x})",
            response.status
        );
    }

    if !cli.quiet {
        eprintln!("\n{} Sector {sector} erased", style("✓").green().bold());
    }

    Ok(())
}
