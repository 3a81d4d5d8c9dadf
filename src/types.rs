use chrono::{DateTime, Utc};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::wcs::WcsSpec;

/// Real-valued image plane data
pub type Pixel = f32;

/// 2D image or variance plane (rows x columns)
pub type Plane = Array2<Pixel>;

/// 2D bit-flag quality mask plane
pub type BitMaskPlane = Array2<u32>;

/// 3D stack of co-registered planes (frame x rows x columns)
pub type PlaneStack = Array3<Pixel>;

/// Exposure start/stop interval for a single observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExposureSpan {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

impl ExposureSpan {
    pub fn new(start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        Self { start, stop }
    }

    /// Temporal midpoint of the exposure, used as the frame's effective
    /// observation time.
    pub fn mid(&self) -> DateTime<Utc> {
        self.start + (self.stop - self.start) / 2
    }
}

/// A single observation: image, variance and quality-mask planes plus the
/// metadata needed to place it on the sky and on the time axis.
///
/// Frames are read-only inputs to the stackers. Only the pre-stack
/// masking/rectification step in the sweep layer substitutes planes, and
/// that completes for every frame before stacking begins.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame identifier (visit/exposure id from the host container)
    pub id: String,
    pub image: Plane,
    pub variance: Plane,
    pub mask: BitMaskPlane,
    pub exposure: ExposureSpan,
    pub wcs: WcsSpec,
}

impl Frame {
    /// Build a frame, checking that all three planes share one shape.
    pub fn new(
        id: impl Into<String>,
        image: Plane,
        variance: Plane,
        mask: BitMaskPlane,
        exposure: ExposureSpan,
        wcs: WcsSpec,
    ) -> StackResult<Self> {
        let id = id.into();
        if image.dim() != variance.dim() || image.dim() != mask.dim() {
            return Err(StackError::Shape(format!(
                "frame {}: planes disagree on shape (image {:?}, variance {:?}, mask {:?})",
                id,
                image.dim(),
                variance.dim(),
                mask.dim()
            )));
        }
        Ok(Self {
            id,
            image,
            variance,
            mask,
            exposure,
            wcs,
        })
    }

    /// Plane shape as (rows, columns).
    pub fn shape(&self) -> (usize, usize) {
        self.image.dim()
    }

    pub fn mid_exposure(&self) -> DateTime<Utc> {
        self.exposure.mid()
    }

    /// Signed offset of this frame's mid-exposure from `epoch`, in hours.
    pub fn hours_from(&self, epoch: DateTime<Utc>) -> f64 {
        (self.mid_exposure() - epoch).num_milliseconds() as f64 / 3_600_000.0
    }
}

/// An ordered, non-empty collection of frames, sorted by mid-exposure time.
/// The temporal-median frame is the reference: it anchors the output grid
/// and the provenance of every stack produced from the set.
#[derive(Debug, Clone)]
pub struct FrameSet {
    frames: Vec<Frame>,
    reference_idx: usize,
}

impl FrameSet {
    pub fn new(mut frames: Vec<Frame>) -> StackResult<Self> {
        if frames.is_empty() {
            return Err(StackError::Config(
                "frame set must contain at least one frame".to_string(),
            ));
        }
        frames.sort_by_key(|f| f.mid_exposure());
        let reference_idx = frames.len() / 2;
        log::debug!(
            "frame set of {} sorted by mid-exposure, reference is {} at {}",
            frames.len(),
            frames[reference_idx].id,
            frames[reference_idx].mid_exposure()
        );
        Ok(Self {
            frames,
            reference_idx,
        })
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut [Frame] {
        &mut self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The temporal-median reference frame.
    pub fn reference(&self) -> &Frame {
        &self.frames[self.reference_idx]
    }
}

/// Record of how a stacked product was made, rendered into header cards for
/// the host container on write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackProvenance {
    /// Combine-mode name (MEAN, MEDIAN, ...)
    pub combine_mode: String,
    /// Number of input frames handed to the stacker
    pub n_combined: usize,
    /// Hypothesis rate in arcsec/hour
    pub rate: f64,
    /// Hypothesis bearing angle in degrees
    pub angle: f64,
    /// RA rate component in arcsec/hour
    pub dra: f64,
    /// Dec rate component in arcsec/hour
    pub ddec: f64,
    /// Identifiers of the input frames
    pub inputs: Vec<String>,
}

impl StackProvenance {
    /// Header key/value pairs for persistence.
    pub fn header_cards(&self) -> Vec<(String, String)> {
        let mut cards = vec![
            (
                "SOFTWARE".to_string(),
                format!("driftstack-{}", env!("CARGO_PKG_VERSION")),
            ),
            ("NCOMBINE".to_string(), self.n_combined.to_string()),
            ("COMBALGO".to_string(), self.combine_mode.clone()),
            ("RATE".to_string(), format!("{:.4}", self.rate)),
            ("ANGLE".to_string(), format!("{:.4}", self.angle)),
            ("DRA".to_string(), format!("{:.6}", self.dra)),
            ("DDEC".to_string(), format!("{:.6}", self.ddec)),
        ];
        for (i, input) in self.inputs.iter().enumerate() {
            cards.push((format!("INPUT{:03}", i), input.clone()));
        }
        cards
    }
}

/// One combined stack: an image plane, the propagated variance plane where
/// the stacking path computes one, and the provenance record. Immutable
/// once produced.
#[derive(Debug, Clone)]
pub struct StackProduct {
    pub image: Plane,
    pub variance: Option<Plane>,
    pub provenance: StackProvenance,
}

/// Error types for stacking operations
#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("processing error: {0}")]
    Processing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for stacking operations
pub type StackResult<T> = Result<T, StackError>;
