//! Error types for jnflash.

use std::{fmt, io};
use thiserror::Error;

/// Result type for jnflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol stage a request belongs to, used to give errors their context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Sector discovery probes.
    Scan,
    /// Sector erase request.
    Erase,
    /// Page program requests.
    Write,
    /// Writing the magic-number marker into the new image.
    MagicMarker,
    /// Invalidating the marker of the previous firmware.
    Invalidate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scan => write!(f, "scan"),
            Self::Erase => write!(f, "erase"),
            Self::Write => write!(f, "write"),
            Self::MagicMarker => write!(f, "magic marker"),
            Self::Invalidate => write!(f, "invalidate"),
        }
    }
}

/// Error type for jnflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Response checksum mismatch: transport corruption or device desync.
    #[error("Integrity fault during {stage}: response {response:02X?} does not XOR to zero")]
    IntegrityFault {
        /// Stage the response belonged to.
        stage: Stage,
        /// Raw response bytes.
        response: [u8; 4],
    },

    /// Device returned a non-success status where success was required.
    #[error("Device rejected {stage} request for sector {sector} (status {status:#04x})")]
    ProtocolRejection {
        /// Stage of the rejected request.
        stage: Stage,
        /// Sector the request addressed.
        sector: u8,
        /// Status byte returned by the device.
        status: u8,
    },

    /// Device rejected a page program request.
    #[error("Device rejected page at 0x{addr:04X} in sector {sector} (status {status:#04x})")]
    DeviceRejectedPage {
        /// Sector being written.
        sector: u8,
        /// Page offset within the sector.
        addr: u16,
        /// Status byte returned by the device.
        status: u8,
    },

    /// No probe found a blank or magic-marked sector.
    #[error("Writable sector not found")]
    NoWritableSector,

    /// Page offset does not fit the 16-bit address field.
    #[error("Address 0x{addr:X} exceeds the 16-bit page address range")]
    AddressOverflow {
        /// Offending page offset.
        addr: u32,
    },

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed firmware image.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Frame construction error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation stopped at a safe point on user request.
    #[error("Interrupted before writing page 0x{addr:04X}")]
    Interrupted {
        /// Offset of the first page that was not sent.
        addr: u32,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
