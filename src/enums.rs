use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

/// Cause recorded when frames end up in different blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitReasonKind {
    ValueMismatch,
    SortDistanceTooLarge,
    MissingPosition,
    Overlap,
    GantryTiltDifference,
    DistanceInconsistency,
    MissingSlices,
}

impl fmt::Display for SplitReasonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SplitReasonKind::ValueMismatch => "value mismatch",
            SplitReasonKind::SortDistanceTooLarge => "sort distance too large",
            SplitReasonKind::MissingPosition => "missing position",
            SplitReasonKind::Overlap => "overlap",
            SplitReasonKind::GantryTiltDifference => "gantry tilt difference",
            SplitReasonKind::DistanceInconsistency => "distance inconsistency",
            SplitReasonKind::MissingSlices => "missing slices",
        };
        f.write_str(text)
    }
}

/// How confident the reader is that it decodes a block correctly, derived
/// from the block's SOP class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReaderImplementationLevel {
    Supported,
    PartlySupported,
    Implemented,
    Unsupported,
    #[default]
    Unknown,
}

impl fmt::Display for ReaderImplementationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReaderImplementationLevel::Supported => "SOPClassSupported",
            ReaderImplementationLevel::PartlySupported => "SOPClassPartlySupported",
            ReaderImplementationLevel::Implemented => "SOPClassImplemented",
            ReaderImplementationLevel::Unsupported => "SOPClassUnsupported",
            ReaderImplementationLevel::Unknown => "SOPClassUnknown",
        };
        f.write_str(text)
    }
}

/// Meaning of the in-plane spacing, from Pixel Spacing vs Imager Pixel Spacing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PixelSpacingInterpretation {
    /// Neither attribute present; the loader invents 1.0.
    #[default]
    Unknown,
    /// Spacing as measured at the detector surface.
    AtDetector,
    /// Spacing as in the patient.
    InPatient,
}

impl fmt::Display for PixelSpacingInterpretation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PixelSpacingInterpretation::Unknown => "unknown spacing",
            PixelSpacingInterpretation::AtDetector => "spacing at detector",
            PixelSpacingInterpretation::InPatient => "spacing in patient",
        };
        f.write_str(text)
    }
}
