//! Quality-mask interpretation.
//!
//! Frames carry an integer bit-flag plane; a [`MaskPlan`] is the explicit,
//! immutable selection of flags that should exclude a pixel from stacking.
//! The plan is passed into every call that needs it rather than living in
//! process-wide state.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::types::{BitMaskPlane, Pixel, Plane};

/// Named pixel-quality conditions with their fixed bit positions in the
/// mask plane, as written by the upstream image pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityFlag {
    Bad,
    Sat,
    Intrp,
    Edge,
    Detected,
    DetectedNegative,
    Suspect,
    NoData,
    Crosstalk,
    NotBlended,
    UnmaskedNan,
    BrightObject,
    Clipped,
    InexactPsf,
    Rejected,
    SensorEdge,
}

impl QualityFlag {
    /// Bit position of this flag in the mask plane.
    pub fn bit(self) -> u32 {
        match self {
            QualityFlag::Bad => 0,
            QualityFlag::Sat => 1,
            QualityFlag::Intrp => 2,
            QualityFlag::Edge => 4,
            QualityFlag::Detected => 5,
            QualityFlag::DetectedNegative => 6,
            QualityFlag::Suspect => 7,
            QualityFlag::NoData => 8,
            QualityFlag::Crosstalk => 9,
            QualityFlag::NotBlended => 10,
            QualityFlag::UnmaskedNan => 11,
            QualityFlag::BrightObject => 12,
            QualityFlag::Clipped => 13,
            QualityFlag::InexactPsf => 14,
            QualityFlag::Rejected => 15,
            QualityFlag::SensorEdge => 16,
        }
    }

    pub fn mask_value(self) -> u32 {
        1 << self.bit()
    }
}

impl std::fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QualityFlag::Bad => "BAD",
            QualityFlag::Sat => "SAT",
            QualityFlag::Intrp => "INTRP",
            QualityFlag::Edge => "EDGE",
            QualityFlag::Detected => "DETECTED",
            QualityFlag::DetectedNegative => "DETECTED_NEGATIVE",
            QualityFlag::Suspect => "SUSPECT",
            QualityFlag::NoData => "NO_DATA",
            QualityFlag::Crosstalk => "CROSSTALK",
            QualityFlag::NotBlended => "NOT_BLENDED",
            QualityFlag::UnmaskedNan => "UNMASKEDNAN",
            QualityFlag::BrightObject => "BRIGHT_OBJECT",
            QualityFlag::Clipped => "CLIPPED",
            QualityFlag::InexactPsf => "INEXACT_PSF",
            QualityFlag::Rejected => "REJECTED",
            QualityFlag::SensorEdge => "SENSOR_EDGE",
        };
        f.write_str(name)
    }
}

/// A chosen subset of quality flags whose presence excludes a pixel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskPlan {
    flags: Vec<QualityFlag>,
}

impl MaskPlan {
    pub fn new(flags: impl IntoIterator<Item = QualityFlag>) -> Self {
        Self {
            flags: flags.into_iter().collect(),
        }
    }

    pub fn single(flag: QualityFlag) -> Self {
        Self::new([flag])
    }

    /// The flags excluded when stacking: detector defects and regions with
    /// no usable sky signal.
    pub fn stack_default() -> Self {
        Self::new([
            QualityFlag::Edge,
            QualityFlag::NoData,
            QualityFlag::BrightObject,
            QualityFlag::Sat,
            QualityFlag::Intrp,
        ])
    }

    pub fn flags(&self) -> &[QualityFlag] {
        &self.flags
    }

    /// OR of the selected flags' mask values.
    pub fn bits(&self) -> u32 {
        self.flags.iter().fold(0, |acc, f| acc | f.mask_value())
    }

    /// Boolean exclusion plane: true where any selected flag is set.
    pub fn to_exclude(&self, mask: &BitMaskPlane) -> Array2<bool> {
        let bits = self.bits();
        mask.mapv(|m| m & bits != 0)
    }

    /// Set plan-flagged pixels of `data` to NaN so they drop out of the
    /// NaN-aware combiners.
    pub fn apply_nan(&self, data: &mut Plane, mask: &BitMaskPlane) {
        let bits = self.bits();
        data.zip_mut_with(mask, |value, &m| {
            if m & bits != 0 {
                *value = Pixel::NAN;
            }
        });
    }
}
