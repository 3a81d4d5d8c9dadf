//! driftstack: A Fast Shift-and-Stack Engine for Moving-Object Searches
//!
//! This library combines time-ordered sky frames along hypothesized linear
//! motions (synthetic tracking) so that faint moving sources add coherently
//! while the background averages down. It provides the tiled pixel-shift
//! pipeline, the WCS-projection alternative, the combination statistics and
//! the rate/angle sweep driver; container I/O stays with the host
//! application behind the interfaces in [`io`].

pub mod core;
pub mod io;
pub mod types;
pub mod wcs;

// Re-export main types and functions for easier access
pub use types::{
    BitMaskPlane, ExposureSpan, Frame, FrameSet, Pixel, Plane, PlaneStack, StackError,
    StackProduct, StackProvenance, StackResult,
};

pub use crate::core::{
    run_sweep, CombineMode, EdgeFill, MaskPlan, MotionHypothesis, ProjectStackParams,
    ProjectionStacker, QualityFlag, RateComponents, RateGrid, ShiftStackParams, ShiftStacker,
    StackMethod, SweepConfig, SweepSummary,
};

pub use crate::io::{FrameSource, MemorySink, StackSink};
pub use crate::wcs::{PixelPoint, SkyCoord, SkyProjection, TanWcs, WcsSpec};
