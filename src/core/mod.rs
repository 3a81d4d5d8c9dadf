//! Core shift-and-stack processing modules

pub mod combine;
pub mod masking;
pub mod project_stack;
pub mod rates;
pub mod resample;
pub mod shift_stack;
pub mod sweep;

// Re-export main types
pub use combine::{weighted_quantile, CombineMode, WEIGHTED_MEDIAN_Q};
pub use masking::{MaskPlan, QualityFlag};
pub use project_stack::{ProjectStackParams, ProjectionStacker, ReprojectedFrame};
pub use rates::{MotionHypothesis, RateComponents, RateGrid};
pub use resample::{down_sample, up_sample};
pub use shift_stack::{EdgeFill, ShiftStackParams, ShiftStacker};
pub use sweep::{run_sweep, StackMethod, SweepConfig, SweepSummary};
