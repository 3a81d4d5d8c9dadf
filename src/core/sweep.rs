//! Sweep orchestration: sub-stack grouping, pre-stack plane preparation
//! and the hypothesis loop with output sequencing.

use ndarray::Zip;
use serde::{Deserialize, Serialize};

use crate::core::combine::nan_median_value;
use crate::core::masking::{MaskPlan, QualityFlag};
use crate::core::project_stack::{ProjectStackParams, ProjectionStacker};
use crate::core::rates::RateGrid;
use crate::core::shift_stack::{ShiftStackParams, ShiftStacker};
use crate::io::StackSink;
use crate::types::{Frame, FrameSet, Pixel, StackResult};

/// Which stacking pipeline drives the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackMethod {
    /// Tiled integer shifts on the up-sampled grid
    Shift,
    /// Reprojection onto the reference grid
    Project,
}

/// Full configuration of one search sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    pub method: StackMethod,
    pub grid: RateGrid,
    /// Number of interleaved sub-stacks produced per hypothesis
    pub n_sub_stacks: usize,
    pub shift: ShiftStackParams,
    pub project: ProjectStackParams,
    /// Reproject frames onto the reference grid before pixel-shift
    /// stacking; required when inputs are not already on a common grid
    pub rectify: bool,
    /// NaN plan-flagged pixels in image and variance before stacking
    pub apply_mask: bool,
    /// Mask pixels whose variance exceeds `clip` times the frame's median
    /// variance and that carry the Detected flag
    pub clip: Option<Pixel>,
    pub mask_plan: MaskPlan,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            method: StackMethod::Shift,
            grid: RateGrid::default(),
            n_sub_stacks: 3,
            shift: ShiftStackParams::default(),
            project: ProjectStackParams::default(),
            rectify: false,
            apply_mask: false,
            clip: None,
            mask_plan: MaskPlan::stack_default(),
        }
    }
}

/// Counts of what a sweep produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub written: usize,
    pub skipped: usize,
}

/// Run the full (group x hypothesis) sweep over `set`, writing each stack
/// to `sink`.
///
/// The frame list is split into `n_sub_stacks` interleaved groups so a
/// real source appears independently in each group's stacks. Outputs whose
/// identifier the sink already holds are skipped, which makes an
/// interrupted sweep resumable. Configuration problems abort before any
/// work; per-frame anomalies inside the stackers only degrade.
pub fn run_sweep<S: StackSink>(
    set: &FrameSet,
    config: &SweepConfig,
    sink: &mut S,
) -> StackResult<SweepSummary> {
    let hypotheses = config.grid.generate()?;
    let reference = set.reference().clone();
    let shift_stacker = ShiftStacker::new(config.shift.clone())?;
    let projector = ProjectionStacker::new(config.project.clone());
    let groups = config.n_sub_stacks.max(1);
    let mut summary = SweepSummary::default();

    for group in 0..groups {
        let mut frames: Vec<Frame> = set
            .frames()
            .iter()
            .skip(group)
            .step_by(groups)
            .cloned()
            .collect();
        if frames.is_empty() {
            log::warn!("sub-stack {} of {} has no frames, skipping", group, groups);
            continue;
        }
        log::info!(
            "sub-stack {}/{}: {} frames, {} hypotheses",
            group,
            groups,
            frames.len(),
            hypotheses.len()
        );
        prepare_frames(&mut frames, &reference, config, &projector)?;

        for hypothesis in &hypotheses {
            let output_id = format!(
                "STACK-{}-{:02}-{:+06.2}-{:+06.2}",
                reference.id, group, hypothesis.rate, hypothesis.angle
            );
            if sink.contains(&output_id) {
                log::warn!("{} exists, skipping", output_id);
                summary.skipped += 1;
                continue;
            }
            let product = match config.method {
                StackMethod::Shift => shift_stacker.stack(&frames, &reference, hypothesis)?,
                StackMethod::Project => projector.stack(&frames, &reference, hypothesis)?,
            };
            sink.write(&output_id, &product)?;
            summary.written += 1;
        }
    }
    Ok(summary)
}

/// Pre-stack plane substitution: rectification, variance clipping and
/// quality masking. Must complete for every frame before stacking starts;
/// the stackers treat frames as read-only.
fn prepare_frames(
    frames: &mut [Frame],
    reference: &Frame,
    config: &SweepConfig,
    projector: &ProjectionStacker,
) -> StackResult<()> {
    if config.rectify && config.method == StackMethod::Shift {
        log::info!(
            "rectifying {} frames onto the grid of {}",
            frames.len(),
            reference.id
        );
        let reprojected = projector.reproject(frames, reference)?;
        let no_data = QualityFlag::NoData.mask_value();
        for (frame, rp) in frames.iter_mut().zip(reprojected) {
            frame.mask = rp.exclude.mapv(|e| if e { no_data } else { 0 });
            frame.image = rp.image;
            frame.variance = rp.variance;
            frame.wcs = reference.wcs;
        }
    }

    if let Some(clip) = config.clip {
        log::info!(
            "masking pixels whose variance exceeds {} times the median variance",
            clip
        );
        let detected_plan = MaskPlan::single(QualityFlag::Detected);
        for frame in frames.iter_mut() {
            let median_variance = nan_median_value(&frame.variance);
            let threshold = median_variance * clip;
            let detected = detected_plan.to_exclude(&frame.mask);
            // only pixels that are both high-variance and part of a
            // detected source are dropped
            let exclude = Zip::from(&frame.variance)
                .and(&detected)
                .map_collect(|&v, &d| d && v > threshold);
            log::debug!(
                "frame {}: median variance {:.4}, clipping {} pixels",
                frame.id,
                median_variance,
                exclude.iter().filter(|&&e| e).count()
            );
            frame.image.zip_mut_with(&exclude, |p, &e| {
                if e {
                    *p = Pixel::NAN;
                }
            });
            frame.variance.zip_mut_with(&exclude, |p, &e| {
                if e {
                    *p = Pixel::NAN;
                }
            });
        }
    }

    if config.apply_mask {
        for frame in frames.iter_mut() {
            config.mask_plan.apply_nan(&mut frame.image, &frame.mask);
            config
                .mask_plan
                .apply_nan(&mut frame.variance, &frame.mask);
        }
    }
    Ok(())
}
