//! Monitor flasher.
//!
//! Drives the JN5169 bootloader monitor through one programming run:
//!
//! ```text
//! Idle -> Scanning -> SectorDecided -> Erasing -> Writing(page) -> Finalizing -> Done
//!                                 \___________________ any error ____________________> Failed
//! ```
//!
//! Every request is answered by exactly one 4-byte response before the next
//! one is sent. The flasher owns its port and closes it when a run ends,
//! whatever the outcome.
//!
//! ## Example
//!
//! ```rust,no_run
//! use jnflash::{FirmwareImage, FlashOptions, MonitorFlasher, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let config = SerialConfig::new("/dev/ttyUSB0", 38400);
//!         let mut flasher = MonitorFlasher::open(&config, FlashOptions::default())?;
//!
//!         let image = FirmwareImage::from_file("mon5169.bin")?;
//!         let report = flasher.flash(image, |written, total| {
//!             println!("{written}/{total} bytes");
//!         })?;
//!         println!("{}", report.scan);
//!     }
//!     Ok(())
//! }
//! ```

#[cfg(test)]
pub(crate) mod mock;
pub mod scan;

use {
    crate::{
        error::{Error, Result, Stage},
        image::{FirmwareImage, Page},
        port::Port,
        protocol::{CommandFrame, ResponseFrame, frame::RESPONSE_LEN, validate_response},
        sector::{MAGIC_INVALID, Sector},
    },
    log::{debug, info, trace, warn},
    scan::{Probe, ScanResult, scan_sectors},
    std::{
        fmt,
        io::{ErrorKind, Read},
        str::FromStr,
    },
};

/// Largest page offset the 16-bit address field can carry.
pub const MAX_PAGE_OFFSET: u32 = 0xFFFF;

/// Monitor protocol revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ProtocolVariant {
    /// Write a configured sector, no scan, no marker handling.
    Fixed,
    /// Blank/magic scan, image written verbatim.
    Scan,
    /// Full scan with size probe, blank sentinel and marker finalization.
    #[default]
    DualSector,
}

impl ProtocolVariant {
    /// All variants, in revision order.
    pub const ALL: [Self; 3] = [Self::Fixed, Self::Scan, Self::DualSector];

    /// Whether sector roles are discovered by probing.
    pub fn scans(self) -> bool {
        !matches!(self, Self::Fixed)
    }

    /// Whether the magic-marked sector is size-probed.
    pub fn probes_size(self) -> bool {
        matches!(self, Self::DualSector)
    }

    /// Whether the run writes the marker itself and invalidates the old one.
    pub fn finalizes(self) -> bool {
        matches!(self, Self::DualSector)
    }

    /// Name used in configuration and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Scan => "scan",
            Self::DualSector => "dual-sector",
        }
    }
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s.to_ascii_lowercase())
            .ok_or_else(|| {
                Error::Config(format!(
                    "unknown protocol variant '{s}' (expected fixed, scan or dual-sector)"
                ))
            })
    }
}

/// Options for one flasher session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashOptions {
    /// Protocol revision to speak.
    pub variant: ProtocolVariant,
    /// Target sector for [`ProtocolVariant::Fixed`].
    pub fixed_sector: Sector,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            variant: ProtocolVariant::default(),
            fixed_sector: Sector::UPPER,
        }
    }
}

/// Why a run ended in [`FlashState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// A response failed its checksum.
    IntegrityFault(Stage),
    /// The device refused a request that had to succeed.
    ProtocolRejection(Stage),
    /// The device refused the page at this offset.
    DeviceRejectedPage {
        /// Page offset within the sector.
        addr: u16,
    },
    /// Neither a blank nor a magic-marked sector was found.
    NoWritableSector,
    /// A page offset did not fit 16 bits.
    AddressOverflow {
        /// Offending offset.
        addr: u32,
    },
    /// The image could not be used.
    InvalidImage,
    /// The device did not answer in time.
    Timeout,
    /// Stopped on request before the page at this offset.
    Interrupted {
        /// Offset of the first unsent page.
        addr: u32,
    },
    /// Port or file I/O failed.
    Transport,
    /// Any other error.
    Other,
}

impl From<&Error> for FailureReason {
    fn from(err: &Error) -> Self {
        match err {
            Error::IntegrityFault { stage, .. } => Self::IntegrityFault(*stage),
            Error::ProtocolRejection { stage, .. } => Self::ProtocolRejection(*stage),
            Error::DeviceRejectedPage { addr, .. } => Self::DeviceRejectedPage { addr: *addr },
            Error::NoWritableSector => Self::NoWritableSector,
            Error::AddressOverflow { addr } => Self::AddressOverflow { addr: *addr },
            Error::InvalidImage(_) => Self::InvalidImage,
            Error::Timeout(_) => Self::Timeout,
            Error::Interrupted { addr } => Self::Interrupted { addr: *addr },
            Error::Io(_) => Self::Transport,
            #[cfg(feature = "native")]
            Error::Serial(_) => Self::Transport,
            Error::Protocol(_) | Error::Config(_) => Self::Other,
        }
    }
}

/// Flasher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlashState {
    /// Nothing sent yet.
    #[default]
    Idle,
    /// Probing candidate sectors.
    Scanning,
    /// Sector roles are known.
    SectorDecided(ScanResult),
    /// Erase request in flight.
    Erasing,
    /// Writing the page with this index.
    Writing {
        /// Zero-based page index.
        page: usize,
    },
    /// Writing the magic marker and invalidating the old one.
    Finalizing,
    /// Run completed.
    Done,
    /// Run aborted.
    Failed(FailureReason),
}

/// Tolerated failure recorded in a [`FlashReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashWarning {
    /// The erase request returned a non-success status.
    EraseStatus {
        /// Erased sector.
        sector: Sector,
        /// Status byte returned by the device.
        status: u8,
    },
    /// The previous firmware's marker could not be invalidated.
    InvalidateFailed {
        /// Firmware sector.
        sector: Sector,
        /// What went wrong.
        reason: String,
    },
}

impl fmt::Display for FlashWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EraseStatus { sector, status } => {
                write!(f, "erase of sector {sector} returned status {status:#04x}")
            },
            Self::InvalidateFailed { sector, reason } => {
                write!(f, "could not invalidate sector {sector}: {reason}")
            },
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashReport {
    /// Sector roles used.
    pub scan: ScanResult,
    /// Number of acknowledged pages.
    pub pages_written: usize,
    /// Number of acknowledged payload bytes.
    pub bytes_written: usize,
    /// Tolerated failures.
    pub warnings: Vec<FlashWarning>,
}

type InterruptChecker = Box<dyn Fn() -> bool + Send>;

/// Flasher for the JN5169 bootloader monitor.
///
/// Generic over the port type `P`, which must implement the `Port` trait.
/// The port is closed when a [`flash`](Self::flash) run ends and when the
/// flasher is dropped.
pub struct MonitorFlasher<P: Port> {
    port: P,
    options: FlashOptions,
    state: FlashState,
    interrupt: Option<InterruptChecker>,
}

impl<P: Port> MonitorFlasher<P> {
    /// Create a flasher over an opened port.
    pub fn new(port: P, options: FlashOptions) -> Self {
        Self {
            port,
            options,
            state: FlashState::Idle,
            interrupt: None,
        }
    }

    /// Use `checker` instead of the global interrupt checker.
    #[must_use]
    pub fn with_interrupt_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        self.interrupt = Some(Box::new(checker));
        self
    }

    /// Current state.
    pub fn state(&self) -> FlashState {
        self.state
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Write a monitor image.
    ///
    /// Runs scan, erase, page writes and (for [`ProtocolVariant::DualSector`])
    /// marker finalization. `progress` is called after every acknowledged
    /// page with `(bytes_written, total_bytes)`; `total_bytes` is 0 when the
    /// image length is unknown. The port is closed before returning.
    pub fn flash<R, F>(&mut self, image: FirmwareImage<R>, mut progress: F) -> Result<FlashReport>
    where
        R: Read,
        F: FnMut(usize, usize),
    {
        let result = self.run(image, &mut progress);
        let result = self.track(result);
        if let Err(e) = self.close() {
            warn!("Failed to close {}: {e}", self.port.name());
        }
        result
    }

    /// Discover sector roles without erasing or writing.
    ///
    /// Probes are program requests; they leave erased and marked cells
    /// unchanged but may clear bits of the probed size byte.
    pub fn scan(&mut self) -> Result<ScanResult> {
        let result = self
            .port
            .clear_buffers()
            .and_then(|()| self.decide_sectors());
        self.track(result)
    }

    /// Erase one sector.
    ///
    /// Returns the validated response; a non-success status is left to the
    /// caller.
    pub fn erase_sector(&mut self, sector: Sector) -> Result<ResponseFrame> {
        let result = self
            .port
            .clear_buffers()
            .and_then(|()| self.erase(sector));
        if result.is_ok() {
            self.set_state(FlashState::Done);
        }
        self.track(result)
    }

    /// Close the port.
    pub fn close(&mut self) -> Result<()> {
        self.port.close()
    }

    fn run<R: Read>(
        &mut self,
        image: FirmwareImage<R>,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<FlashReport> {
        let variant = self.options.variant;
        info!(
            "Flashing over {} at {} baud ({variant})",
            self.port.name(),
            self.port.baud_rate()
        );
        let mut image = image.with_blank_sentinel(variant.finalizes());

        if let Some(len) = image.payload_len() {
            check_fits(len)?;
        }
        let first = image
            .next_page()?
            .ok_or_else(|| Error::InvalidImage("no data after the header".into()))?;

        self.port.clear_buffers()?;
        let scan = self.decide_sectors()?;
        let mut warnings = Vec::new();

        let response = self.erase(scan.target)?;
        if !response.is_success() {
            warn!(
                "Erase of sector {} returned status {:#04x}, continuing",
                scan.target, response.status
            );
            warnings.push(FlashWarning::EraseStatus {
                sector: scan.target,
                status: response.status,
            });
        }

        let (pages_written, bytes_written) =
            self.write_pages(scan.target, first, &mut image, progress)?;

        if variant.finalizes() {
            self.finalize(&scan, &mut warnings)?;
        }

        self.set_state(FlashState::Done);
        info!(
            "Wrote {bytes_written} bytes ({pages_written} pages) to sector {}",
            scan.target
        );

        Ok(FlashReport {
            scan,
            pages_written,
            bytes_written,
            warnings,
        })
    }

    fn decide_sectors(&mut self) -> Result<ScanResult> {
        let variant = self.options.variant;
        let scan = if variant.scans() {
            self.set_state(FlashState::Scanning);
            info!("Scanning sectors ({variant})");
            scan_sectors(variant, |probe, sector| self.send_probe(probe, sector))?
        } else {
            ScanResult::configured(self.options.fixed_sector)
        };

        info!("{scan}");
        self.set_state(FlashState::SectorDecided(scan));
        Ok(scan)
    }

    fn send_probe(&mut self, probe: Probe, sector: Sector) -> Result<bool> {
        let response = self.transact(&probe.frame(sector)?, Stage::Scan)?;
        debug!(
            "{probe} probe on sector {sector}: status {:#04x}",
            response.status
        );
        Ok(response.is_success())
    }

    fn erase(&mut self, sector: Sector) -> Result<ResponseFrame> {
        self.set_state(FlashState::Erasing);
        info!("Erasing sector {sector}");
        self.transact(&CommandFrame::erase(sector.index()), Stage::Erase)
    }

    fn write_pages<R: Read>(
        &mut self,
        sector: Sector,
        first: Page,
        image: &mut FirmwareImage<R>,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<(usize, usize)> {
        let total = image
            .payload_len()
            .map_or(0, |len| usize::try_from(len).unwrap_or(usize::MAX));
        let mut pages = 0;
        let mut bytes = 0;

        info!("Writing sector {sector}");
        let mut next = Some(first);
        while let Some(page) = next {
            let addr = u16::try_from(page.offset).map_err(|_| Error::AddressOverflow {
                addr: page.offset,
            })?;
            if self.interrupt_requested() {
                return Err(Error::Interrupted { addr: page.offset });
            }

            self.set_state(FlashState::Writing { page: pages });
            let frame = CommandFrame::program(sector.address() + page.offset, &page.data)?;
            let response = self.transact(&frame, Stage::Write)?;
            if !response.is_success() {
                return Err(Error::DeviceRejectedPage {
                    sector: sector.index(),
                    addr,
                    status: response.status,
                });
            }
            debug!("0x{addr:04x} OK");

            pages += 1;
            bytes += page.data.len();
            progress(bytes, total);
            next = image.next_page()?;
        }

        Ok((pages, bytes))
    }

    fn finalize(&mut self, scan: &ScanResult, warnings: &mut Vec<FlashWarning>) -> Result<()> {
        self.set_state(FlashState::Finalizing);

        info!("Writing magic number to sector {}", scan.target);
        let response = self.transact(&Probe::Magic.frame(scan.target)?, Stage::MagicMarker)?;
        if !response.is_success() {
            return Err(Error::ProtocolRejection {
                stage: Stage::MagicMarker,
                sector: scan.target.index(),
                status: response.status,
            });
        }

        info!("Invalidating magic number of sector {}", scan.firmware);
        let frame = CommandFrame::program(scan.firmware.address(), &[MAGIC_INVALID])?;
        let reason = match self.transact(&frame, Stage::Invalidate) {
            Ok(response) if response.is_success() => return Ok(()),
            Ok(response) => format!("status {:#04x}", response.status),
            Err(e @ Error::IntegrityFault { .. }) => e.to_string(),
            Err(e) => return Err(e),
        };

        warn!(
            "Could not invalidate sector {}: {reason}; the new monitor is still marked",
            scan.firmware
        );
        warnings.push(FlashWarning::InvalidateFailed {
            sector: scan.firmware,
            reason,
        });
        Ok(())
    }

    /// Send one request and read its validated response.
    fn transact(&mut self, frame: &CommandFrame, stage: Stage) -> Result<ResponseFrame> {
        let request = frame.build();
        debug!("TX [{stage}] {request:02X?}");
        self.port
            .write_all_bytes(&request)?;

        let mut response = [0u8; RESPONSE_LEN];
        if let Err(e) = self
            .port
            .read_exact(&mut response)
        {
            return Err(match e.kind() {
                ErrorKind::TimedOut => Error::Timeout(format!(
                    "no {stage} response within {:?}",
                    self.port.timeout()
                )),
                _ => Error::Io(e),
            });
        }
        debug!("RX [{stage}] {response:02X?}");

        validate_response(response, stage)
    }

    fn interrupt_requested(&self) -> bool {
        match &self.interrupt {
            Some(checker) => checker(),
            None => crate::is_interrupted_requested(),
        }
    }

    fn set_state(&mut self, state: FlashState) {
        trace!("State {:?} -> {state:?}", self.state);
        self.state = state;
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.set_state(FlashState::Failed(FailureReason::from(e)));
        }
        result
    }
}

impl<P: Port> Drop for MonitorFlasher<P> {
    fn drop(&mut self) {
        let _ = self.port.close();
    }
}

/// Reject payloads whose last page offset does not fit 16 bits.
fn check_fits(payload_len: u64) -> Result<()> {
    if payload_len > u64::from(MAX_PAGE_OFFSET) + 1 {
        return Err(Error::AddressOverflow {
            addr: MAX_PAGE_OFFSET + 1,
        });
    }
    Ok(())
}

// Native-specific convenience functions
#[cfg(feature = "native")]
mod native_impl {
    use super::{FlashOptions, MonitorFlasher, Result, info};
    use crate::port::{NativePort, SerialConfig};

    impl MonitorFlasher<NativePort> {
        /// Open a serial port and create a flasher over it.
        pub fn open(config: &SerialConfig, options: FlashOptions) -> Result<Self> {
            info!(
                "Opening {} at {} baud",
                config.port_name, config.baud_rate
            );
            Ok(Self::new(NativePort::open(config)?, options))
        }
    }
}
