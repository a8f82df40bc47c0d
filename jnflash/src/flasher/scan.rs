//! Sector discovery.
//!
//! The monitor has no read command, so sector roles are inferred from
//! single-byte program requests. Flash programming can only clear bits,
//! which makes writing a byte succeed exactly when the cell already holds a
//! superset of its bits:
//!
//! | Probe        | Offset | Byte | Succeeds when the sector...              |
//! |--------------|--------|------|------------------------------------------|
//! | blank        | 0x00   | 0xFF | is erased                                |
//! | magic        | 0x00   | 0x12 | carries a bootable image                 |
//! | size (large) | 0x21   | 0x03 | holds an image of the full-size class    |
//! | size (medium)| 0x21   | 0x02 | holds an image of the medium-size class  |
//!
//! [`scan_sectors`] turns an ordered sequence of these probes into a
//! [`ScanResult`]. It takes the probe as a closure so the decision table can
//! be exercised without a device.

use {
    super::ProtocolVariant,
    crate::{
        error::{Error, Result},
        protocol::CommandFrame,
        sector::{IMAGE_LENGTH_PROBE_OFFSET, MAGIC_BLANK, MAGIC_VALID, Sector},
    },
    std::fmt,
};

/// Single-byte program request used to learn a sector's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// 0xFF at offset 0.
    Blank,
    /// 0x12 at offset 0.
    Magic,
    /// 0x03 at offset 0x21.
    SizeLarge,
    /// 0x02 at offset 0x21.
    SizeMedium,
}

impl Probe {
    /// Offset of the probed byte inside the sector.
    pub fn offset(self) -> u32 {
        match self {
            Self::Blank | Self::Magic => 0,
            Self::SizeLarge | Self::SizeMedium => IMAGE_LENGTH_PROBE_OFFSET,
        }
    }

    /// Byte written by the probe.
    pub fn value(self) -> u8 {
        match self {
            Self::Blank => MAGIC_BLANK,
            Self::Magic => MAGIC_VALID,
            Self::SizeLarge => 0x03,
            Self::SizeMedium => 0x02,
        }
    }

    /// Program request carrying this probe for `sector`.
    pub fn frame(self, sector: Sector) -> Result<CommandFrame> {
        CommandFrame::program(sector.address() + self.offset(), &[self.value()])
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blank => write!(f, "blank"),
            Self::Magic => write!(f, "magic"),
            Self::SizeLarge => write!(f, "size (large)"),
            Self::SizeMedium => write!(f, "size (medium)"),
        }
    }
}

/// Size class of the image resident in the magic-marked sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SizeClass {
    /// Length byte 1 accepts 0x03.
    Large,
    /// Length byte 1 accepts 0x02.
    Medium,
}

/// How the sector roles were decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Decision {
    /// No scan; the target came from configuration.
    Configured,
    /// The target answered the blank probe.
    Blank,
    /// The firmware sector answered the magic probe (and a size probe, when
    /// the variant asks for one).
    Firmware,
    /// The magic-marked sector holds a previous monitor, overwritten in
    /// place.
    ResidentMonitor,
}

/// Sector roles discovered for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanResult {
    /// Sector the monitor image is written to.
    pub target: Sector,
    /// Sector holding the application firmware.
    pub firmware: Sector,
    /// Resident image size class, if a size probe succeeded.
    pub size_class: Option<SizeClass>,
    /// Evidence behind the roles.
    pub decision: Decision,
}

impl ScanResult {
    /// Roles for a run without scanning.
    pub fn configured(target: Sector) -> Self {
        Self {
            target,
            firmware: target.complement(),
            size_class: None,
            decision: Decision::Configured,
        }
    }
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "target sector {}, firmware sector {}",
            self.target, self.firmware
        )?;
        match self.decision {
            Decision::Configured => write!(f, " (configured)"),
            Decision::Blank => write!(f, " (target is blank)"),
            Decision::Firmware => match self.size_class {
                Some(SizeClass::Large) => write!(f, " (firmware image: large)"),
                Some(SizeClass::Medium) => write!(f, " (firmware image: medium)"),
                None => write!(f, " (firmware is magic-marked)"),
            },
            Decision::ResidentMonitor => write!(f, " (replacing resident monitor)"),
        }
    }
}

/// Decide sector roles from probe outcomes.
///
/// `probe` sends one probe and reports whether the device accepted it.
/// Errors from `probe` abort the scan; rejections only steer it. Probes are
/// issued in a fixed order and the first success wins.
pub fn scan_sectors<F>(variant: ProtocolVariant, mut probe: F) -> Result<ScanResult>
where
    F: FnMut(Probe, Sector) -> Result<bool>,
{
    if !variant.scans() {
        return Err(Error::Config(format!("{variant} variant does not scan")));
    }

    if let Some(blank) = first_success(&mut probe, Probe::Blank)? {
        return Ok(ScanResult {
            target: blank,
            firmware: blank.complement(),
            size_class: None,
            decision: Decision::Blank,
        });
    }

    let Some(magic) = first_success(&mut probe, Probe::Magic)? else {
        return Err(Error::NoWritableSector);
    };

    if !variant.probes_size() {
        return Ok(ScanResult {
            target: magic.complement(),
            firmware: magic,
            size_class: None,
            decision: Decision::Firmware,
        });
    }

    for (kind, class) in [
        (Probe::SizeLarge, SizeClass::Large),
        (Probe::SizeMedium, SizeClass::Medium),
    ] {
        if probe(kind, magic)? {
            return Ok(ScanResult {
                target: magic.complement(),
                firmware: magic,
                size_class: Some(class),
                decision: Decision::Firmware,
            });
        }
    }

    Ok(ScanResult {
        target: magic,
        firmware: magic.complement(),
        size_class: None,
        decision: Decision::ResidentMonitor,
    })
}

fn first_success<F>(probe: &mut F, kind: Probe) -> Result<Option<Sector>>
where
    F: FnMut(Probe, Sector) -> Result<bool>,
{
    for sector in Sector::CANDIDATES {
        if probe(kind, sector)? {
            return Ok(Some(sector));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;

    /// Run a scan where `accepts` decides each probe; returns the result and
    /// the probes issued.
    fn run(
        variant: ProtocolVariant,
        accepts: impl Fn(Probe, u8) -> bool,
    ) -> (Result<ScanResult>, Vec<(Probe, u8)>) {
        let mut issued = Vec::new();
        let result = scan_sectors(variant, |probe, sector| {
            issued.push((probe, sector.index()));
            Ok(accepts(probe, sector.index()))
        });
        (result, issued)
    }

    #[test]
    fn test_probe_frames() {
        assert_eq!(
            Probe::Blank
                .frame(Sector::UPPER)
                .unwrap()
                .build(),
            vec![0x07, 0x09, 0x00, 0x00, 0x04, 0x00, 0xFF, 0xF5]
        );
        let size = Probe::SizeLarge
            .frame(Sector::LOWER)
            .unwrap()
            .build();
        assert_eq!(&size[..7], &[0x07, 0x09, 0x21, 0x00, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn test_blank_lower_sector_wins_first() {
        let (result, issued) = run(ProtocolVariant::DualSector, |_, _| true);
        let scan = result.unwrap();
        assert_eq!(scan.target, Sector::LOWER);
        assert_eq!(scan.firmware, Sector::UPPER);
        assert_eq!(scan.decision, Decision::Blank);
        assert_eq!(issued, vec![(Probe::Blank, 0)]);
    }

    #[test]
    fn test_blank_upper_sector() {
        let (result, issued) = run(ProtocolVariant::DualSector, |p, s| p == Probe::Blank && s == 8);
        let scan = result.unwrap();
        assert_eq!(scan.target, Sector::UPPER);
        assert_eq!(scan.firmware, Sector::LOWER);
        assert_eq!(issued, vec![(Probe::Blank, 0), (Probe::Blank, 8)]);
    }

    #[test]
    fn test_scan_variant_targets_complement_of_magic() {
        let (result, issued) = run(ProtocolVariant::Scan, |p, s| p == Probe::Magic && s == 8);
        let scan = result.unwrap();
        assert_eq!(scan.target, Sector::LOWER);
        assert_eq!(scan.firmware, Sector::UPPER);
        assert_eq!(scan.decision, Decision::Firmware);
        assert_eq!(issued.len(), 4);
        assert!(
            !issued
                .iter()
                .any(|(p, _)| matches!(p, Probe::SizeLarge | Probe::SizeMedium))
        );
    }

    #[test]
    fn test_size_probe_locks_class() {
        let (result, issued) = run(ProtocolVariant::DualSector, |p, s| {
            (p == Probe::Magic && s == 0) || p == Probe::SizeMedium
        });
        let scan = result.unwrap();
        assert_eq!(scan.firmware, Sector::LOWER);
        assert_eq!(scan.target, Sector::UPPER);
        assert_eq!(scan.size_class, Some(SizeClass::Medium));
        assert_eq!(
            issued,
            vec![
                (Probe::Blank, 0),
                (Probe::Blank, 8),
                (Probe::Magic, 0),
                (Probe::SizeLarge, 0),
                (Probe::SizeMedium, 0),
            ]
        );
    }

    #[test]
    fn test_large_size_short_circuits_medium() {
        let (result, issued) = run(ProtocolVariant::DualSector, |p, s| {
            (p == Probe::Magic && s == 8) || p == Probe::SizeLarge
        });
        assert_eq!(result.unwrap().size_class, Some(SizeClass::Large));
        assert_eq!(issued.last(), Some(&(Probe::SizeLarge, 8)));
    }

    #[test]
    fn test_failed_size_probes_overwrite_resident_monitor() {
        let (result, _) = run(ProtocolVariant::DualSector, |p, s| p == Probe::Magic && s == 8);
        let scan = result.unwrap();
        assert_eq!(scan.target, Sector::UPPER);
        assert_eq!(scan.firmware, Sector::LOWER);
        assert_eq!(scan.size_class, None);
        assert_eq!(scan.decision, Decision::ResidentMonitor);
    }

    #[test]
    fn test_no_success_is_no_writable_sector() {
        let (result, issued) = run(ProtocolVariant::DualSector, |_, _| false);
        assert!(matches!(result, Err(Error::NoWritableSector)));
        assert_eq!(issued.len(), 4);
    }

    #[test]
    fn test_scan_is_deterministic() {
        let accepts = |p: Probe, s: u8| (p == Probe::Magic && s == 0) || p == Probe::SizeLarge;
        let (first, first_issued) = run(ProtocolVariant::DualSector, accepts);
        let (second, second_issued) = run(ProtocolVariant::DualSector, accepts);
        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(first_issued, second_issued);
    }

    #[test]
    fn test_probe_error_aborts() {
        let mut calls = 0;
        let result = scan_sectors(ProtocolVariant::DualSector, |_, _| {
            calls += 1;
            Err(Error::IntegrityFault {
                stage: Stage::Scan,
                response: [0x03, 0x0A, 0x00, 0x00],
            })
        });
        assert!(matches!(result, Err(Error::IntegrityFault { .. })));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_fixed_variant_does_not_scan() {
        let (result, issued) = run(ProtocolVariant::Fixed, |_, _| true);
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(issued.is_empty());
    }

    #[test]
    fn test_display() {
        let scan = ScanResult::configured(Sector::UPPER);
        assert_eq!(scan.to_string(), "target sector 8, firmware sector 0 (configured)");
    }
}
