//! # jnflash
//!
//! A library for programming NXP JN5169 flash through the UART bootloader
//! monitor.
//!
//! This crate provides the core functionality for talking to the monitor
//! over a serial port, including:
//!
//! - The XOR-checksummed request/response frame codec
//! - Sector discovery across the two redundant flash halves
//! - Erase, paged programming and magic-number finalization
//! - Firmware image paging
//!
//! ## Protocol Variants
//!
//! - `fixed`: write a configured sector verbatim
//! - `scan`: probe for a blank or magic-marked sector first
//! - `dual-sector` (default): full scan, sentinel write and marker handover
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use jnflash::{FirmwareImage, FlashOptions, MonitorFlasher, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("mon5169.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let config = SerialConfig::new("/dev/ttyUSB0", 38400);
//!         let mut flasher = MonitorFlasher::open(&config, FlashOptions::default())?;
//!
//!         let report = flasher.flash(image, |written, total| {
//!             println!("Writing: {written}/{total}");
//!         })?;
//!         println!("Wrote {} bytes, {}", report.bytes_written, report.scan);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod error;
pub mod flasher;
pub mod image;
pub mod port;
pub mod protocol;
pub mod sector;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). The flasher
/// consults it between acknowledged pages only.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use {
    device::{auto_detect_port, detect_ports},
    port::{NativePort, NativePortEnumerator},
};
pub use {
    device::{DetectedPort, DeviceKind, format_port_list, select_default_port},
    error::{Error, Result, Stage},
    flasher::{
        FailureReason, FlashOptions, FlashReport, FlashState, FlashWarning, MonitorFlasher,
        ProtocolVariant,
        scan::{Decision, Probe, ScanResult, SizeClass, scan_sectors},
    },
    image::{FirmwareImage, PAGE_SIZE, Page},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{CommandFrame, ResponseFrame, validate_response},
    sector::Sector,
};
