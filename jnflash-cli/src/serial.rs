//! Interactive serial port selection.
//!
//! Ports are chosen in this order:
//! - `--port` / `JNFLASH_PORT`
//! - the port remembered in the config file
//! - a recognised USB-UART bridge, or an interactive pick
//!
//! Non-interactive mode never prompts and treats ambiguity as a usage error.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    jnflash::{DetectedPort, PortInfo, detect_ports},
    log::{debug, error, info},
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if the choice is ambiguous).
    pub non_interactive: bool,
}

/// Selected port and whether it needs no confirmation from the user.
pub struct SelectedPort {
    /// The selected port info.
    pub port: DetectedPort,
    /// Recognised bridge, or named explicitly by the user or config.
    pub is_known: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn cancelled_err() -> anyhow::Error {
    CliError::Cancelled("port selection cancelled".to_string()).into()
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name, detect_ports()));
    }

    if let Some(port_name) = &config.connection.port {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name, detect_ports()));
    }

    choose_port(detect_ports(), options.non_interactive)
}

/// Pick from detected ports, preferring recognised bridges.
fn choose_port(ports: Vec<DetectedPort>, non_interactive: bool) -> Result<SelectedPort> {
    if ports.is_empty() {
        return Err(usage_err(
            "no serial ports found; connect the board or pass --port",
        ));
    }

    let (known, unknown): (Vec<_>, Vec<_>) = ports
        .into_iter()
        .partition(|p| p.device.is_known());
    let candidates = if known.is_empty() { unknown } else { known };

    if non_interactive {
        return select_non_interactive_port(candidates);
    }

    match <[DetectedPort; 1]>::try_from(candidates) {
        Ok([port]) if port.device.is_known() => {
            info!(
                "Auto-selected port: {} [{}]",
                port.name(),
                port.device.name()
            );
            Ok(SelectedPort {
                port,
                is_known: true,
            })
        },
        Ok([port]) => {
            ensure_interactive_terminal()?;
            confirm_single_port(port)
        },
        Err(candidates) => {
            ensure_interactive_terminal()?;
            select_port_interactive(candidates)
        },
    }
}

fn select_non_interactive_port(candidates: Vec<DetectedPort>) -> Result<SelectedPort> {
    match <[DetectedPort; 1]>::try_from(candidates) {
        Ok([port]) => Ok(SelectedPort {
            is_known: port.device.is_known(),
            port,
        }),
        Err(candidates) if candidates.is_empty() => {
            Err(usage_err("no serial ports available; pass --port"))
        },
        Err(candidates) => Err(usage_err(&format!(
            "multiple serial ports found ({}); pass --port in non-interactive mode",
            candidates.len()
        ))),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "port selection needs an interactive terminal; pass --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                cancelled_err()
            } else {
                usage_err(&format!("prompt failed: {io_err}"))
            }
        },
    }
}

/// Find a port by name among `ports`, or describe it bare if absent.
fn find_port_by_name(name: &str, ports: Vec<DetectedPort>) -> SelectedPort {
    let found = ports
        .into_iter()
        .find(|p| p.name() == name || p.name().eq_ignore_ascii_case(name));

    let port = found.unwrap_or_else(|| {
        DetectedPort::new(PortInfo {
            name: name.to_string(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        })
    });

    SelectedPort {
        port,
        is_known: true,
    }
}

/// Display label for a port in the selection list.
fn port_label(port: &DetectedPort) -> String {
    let name = if port.device.is_known() {
        style(port.name()).bold().to_string()
    } else {
        port.name().to_string()
    };

    let device_info = if port.device.is_known() {
        format!(" [{}]", style(port.device.name()).yellow())
    } else if let (Some(vid), Some(pid)) = (port.info.vid, port.info.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .info
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{device_info}{product}")
}

/// Interactive port selection.
fn select_port_interactive(ports: Vec<DetectedPort>) -> Result<SelectedPort> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    // Keep labels on one line in narrow terminals
    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&port_label(p), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the serial port of the JN5169 board")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    let index = selection.ok_or_else(cancelled_err)?;
    let port = ports
        .into_iter()
        .nth(index)
        .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
    Ok(SelectedPort {
        is_known: port.device.is_known(),
        port,
    })
}

/// Confirm use of a single unrecognized port.
fn confirm_single_port(port: DetectedPort) -> Result<SelectedPort> {
    let product_info = port
        .info
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}{product_info}?", port.name()))
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
        Err(cancelled_err())
    }
}

/// Ask user if they want to remember this port in the local config.
pub fn ask_remember_port(port: &DetectedPort, config: &mut Config) -> Result<()> {
    if !std::io::stdin().is_terminal() {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {} for this directory?", port.name()))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_port(port.name()) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, vid_pid: Option<(u16, u16)>) -> DetectedPort {
        DetectedPort::new(PortInfo {
            name: name.to_string(),
            vid: vid_pid.map(|(vid, _)| vid),
            pid: vid_pid.map(|(_, pid)| pid),
            manufacturer: None,
            product: None,
            serial_number: None,
        })
    }

    fn assert_usage(err: &anyhow::Error) {
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_serial_options_default() {
        let options = SerialOptions::default();
        assert!(options.port.is_none());
        assert!(!options.non_interactive);
    }

    #[test]
    fn test_find_port_by_name_exact_and_case_insensitive() {
        let ports = vec![port("COM3", Some((0x0403, 0x6001)))];
        let selected = find_port_by_name("com3", ports);
        assert_eq!(selected.port.name(), "COM3");
        assert!(selected.port.device.is_known());
        assert!(selected.is_known);
    }

    #[test]
    fn test_find_port_by_name_missing_builds_placeholder() {
        let selected = find_port_by_name("/dev/ttyACM9", vec![]);
        assert_eq!(selected.port.name(), "/dev/ttyACM9");
        assert!(!selected.port.device.is_known());
        assert!(selected.is_known);
    }

    #[test]
    fn test_choose_port_no_ports_is_usage_error() {
        let err = choose_port(vec![], true).err().unwrap();
        assert_usage(&err);
    }

    #[test]
    fn test_choose_port_prefers_known_bridge() {
        let ports = vec![
            port("/dev/ttyS0", None),
            port("/dev/ttyUSB0", Some((0x0403, 0x6015))),
        ];
        let selected = choose_port(ports, true).unwrap();
        assert_eq!(selected.port.name(), "/dev/ttyUSB0");
        assert!(selected.is_known);
    }

    #[test]
    fn test_choose_port_single_known_needs_no_terminal() {
        let ports = vec![port("/dev/ttyUSB0", Some((0x1A86, 0x7523)))];
        let selected = choose_port(ports, false).unwrap();
        assert_eq!(selected.port.name(), "/dev/ttyUSB0");
    }

    #[test]
    fn test_select_non_interactive_multiple_ports_returns_usage_error() {
        let ports = vec![port("/dev/ttyUSB0", None), port("/dev/ttyUSB1", None)];
        let err = choose_port(ports, true).err().unwrap();
        assert_usage(&err);
        assert!(err.to_string().contains("multiple"));
    }

    #[test]
    fn test_select_non_interactive_no_ports_returns_usage_error() {
        let err = select_non_interactive_port(vec![]).err().unwrap();
        assert_usage(&err);
    }

    #[test]
    fn test_select_non_interactive_single_unknown_port() {
        let selected = select_non_interactive_port(vec![port("/dev/ttyS0", None)]).unwrap();
        assert_eq!(selected.port.name(), "/dev/ttyS0");
        assert!(!selected.is_known);
    }

    #[test]
    fn test_port_label_contents() {
        console::set_colors_enabled(false);
        let mut ftdi = port("/dev/ttyUSB0", Some((0x0403, 0x6001)));
        ftdi.info.product = Some("FT232R USB UART".to_string());
        assert_eq!(
            port_label(&ftdi),
            "/dev/ttyUSB0 [FTDI] - FT232R USB UART"
        );

        let other = port("/dev/ttyACM0", Some((0x1234, 0xABCD)));
        assert_eq!(port_label(&other), "/dev/ttyACM0 (1234:ABCD)");
    }
}
