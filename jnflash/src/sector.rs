//! Flash sector model.
//!
//! The JN5169 keeps two redundant firmware halves: sector 0 at the bottom of
//! flash and sector 8 at the start of the upper half. A sector and its
//! complement always form such a pair.

use std::fmt;

/// Size of one erasable flash sector in bytes.
pub const SECTOR_SIZE: u32 = 0x8000;

/// Index offset separating the lower and upper flash halves.
pub const HALF_FLASH_SECTORS: u8 = 8;

/// Number of sectors on the device.
pub const SECTOR_COUNT: u8 = 16;

/// Magic-number byte of a bootable image.
pub const MAGIC_VALID: u8 = 0x12;

/// Magic-number byte of an erased sector.
pub const MAGIC_BLANK: u8 = 0xFF;

/// Magic-number byte of an invalidated image.
pub const MAGIC_INVALID: u8 = 0x00;

/// Offset of byte 1 of the 32-bit image length stored at 0x20..0x24.
pub const IMAGE_LENGTH_PROBE_OFFSET: u32 = 0x21;

/// A flash sector identified by its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sector(u8);

impl Sector {
    /// First sector of the lower flash half.
    pub const LOWER: Self = Self(0);

    /// First sector of the upper flash half.
    pub const UPPER: Self = Self(HALF_FLASH_SECTORS);

    /// Candidate sectors probed during scanning, in probe order.
    pub const CANDIDATES: [Self; 2] = [Self::LOWER, Self::UPPER];

    /// Create a sector, returning `None` if the index is out of range.
    pub fn new(index: u8) -> Option<Self> {
        (index < SECTOR_COUNT).then_some(Self(index))
    }

    /// Sector index.
    pub fn index(self) -> u8 {
        self.0
    }

    /// Byte address of the sector start.
    pub fn address(self) -> u32 {
        u32::from(self.0) * SECTOR_SIZE
    }

    /// The sector in the other flash half.
    pub fn complement(self) -> Self {
        Self(self.0 ^ HALF_FLASH_SECTORS)
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u8> for Sector {
    type Error = crate::Error;

    fn try_from(index: u8) -> crate::Result<Self> {
        Self::new(index).ok_or_else(|| {
            crate::Error::Config(format!(
                "sector {index} out of range (0..{SECTOR_COUNT})"
            ))
        })
    }
}
