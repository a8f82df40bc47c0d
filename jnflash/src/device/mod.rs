//! Serial port discovery and classification.
//!
//! JN5169 boards are usually reached through a USB-UART bridge; knowing the
//! bridge lets the CLI pick a sensible default port.

use crate::error::{Error, Result};
use crate::port::PortInfo;
use log::info;

#[cfg(feature = "native")]
use {
    crate::port::{NativePortEnumerator, PortEnumerator},
    log::{debug, trace},
};

/// Known USB-UART bridge kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// FTDI FT232/FT2232 (NXP development kits, USB dongles).
    Ftdi,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// Prolific PL2303 USB-to-Serial converter.
    Prolific,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs for common USB-UART bridges.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        DeviceKind::Ftdi,
    ),
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x55D4],
        DeviceKind::Ch340,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71], DeviceKind::Cp210x),
    (0x067B, &[0x2303, 0x23A3], DeviceKind::Prolific),
];

impl DeviceKind {
    /// Classify a VID/PID combination.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_USB_DEVICES
            .iter()
            .find(|(known_vid, pids, _)| vid == *known_vid && pids.contains(&pid))
            .map_or(Self::Unknown, |(_, _, kind)| *kind)
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ftdi => "FTDI",
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Prolific => "PL2303",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known bridge.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Discovered serial port with its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedPort {
    /// Port information as reported by the OS.
    pub info: PortInfo,
    /// Classified bridge kind.
    pub device: DeviceKind,
}

impl DetectedPort {
    /// Classify a port.
    pub fn new(info: PortInfo) -> Self {
        let device = match (info.vid, info.pid) {
            (Some(vid), Some(pid)) => DeviceKind::from_vid_pid(vid, pid),
            _ => DeviceKind::Unknown,
        };
        Self { info, device }
    }

    /// Port name/path.
    pub fn name(&self) -> &str {
        &self.info.name
    }
}

/// Detect all available serial ports.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    match NativePortEnumerator::list_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|info| {
                let port = DetectedPort::new(info);
                trace!("Found port {} ({:?})", port.name(), port.device);
                port
            })
            .collect(),
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            Vec::new()
        },
    }
}

/// Pick a single port: the first known bridge, else the only port present.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    select_default_port(detect_ports())
}

/// Selection policy behind [`auto_detect_port`].
pub fn select_default_port(ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    if let Some(port) = ports
        .iter()
        .find(|p| p.device.is_known())
    {
        info!(
            "Auto-detected {} USB-UART bridge: {}",
            port.device.name(),
            port.name()
        );
        return Ok(port.clone());
    }

    match <[DetectedPort; 1]>::try_from(ports) {
        Ok([port]) => Ok(port),
        Err(ports) if ports.is_empty() => Err(Error::Config("no serial ports found".into())),
        Err(ports) => Err(Error::Config(format!(
            "{} serial ports found, none recognised; pass --port",
            ports.len()
        ))),
    }
}

/// Format a list of detected ports for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let device_info = if port.device.is_known() {
                format!(" [{}]", port.device.name())
            } else if let (Some(vid), Some(pid)) = (port.info.vid, port.info.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };

            let product_info = port
                .info
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();

            format!("{}{}{}", port.name(), device_info, product_info)
        })
        .collect()
}
