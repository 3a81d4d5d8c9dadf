//! WCS-projection stacking.
//!
//! The alternative to pixel-domain shifting: every frame is resampled onto
//! the reference frame's pixel grid under its own coordinate transform,
//! optionally after displacing the transform's reference coordinate by
//! `rate x dt` so a motion hypothesis becomes a header-level shift. Also
//! used without a hypothesis to rectify frames onto a common grid before
//! pixel-shift stacking.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::core::combine::{nan_mean, nan_median, CombineMode};
use crate::core::masking::MaskPlan;
use crate::core::rates::MotionHypothesis;
use crate::types::{
    Frame, Pixel, Plane, PlaneStack, StackProduct, StackProvenance, StackResult,
};
use crate::wcs::{PixelPoint, SkyProjection, TanWcs, WcsSpec};

/// Projection-stacking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectStackParams {
    /// Combination statistic; the projection path supports MEAN and MEDIAN
    pub mode: CombineMode,
    /// Flags marking pixels to exclude before resampling
    pub mask_plan: MaskPlan,
}

impl Default for ProjectStackParams {
    fn default() -> Self {
        Self {
            mode: CombineMode::Mean,
            mask_plan: MaskPlan::stack_default(),
        }
    }
}

/// One frame resampled onto the reference grid.
#[derive(Debug, Clone)]
pub struct ReprojectedFrame {
    pub id: String,
    pub image: Plane,
    pub variance: Plane,
    /// True where the resampled pixel carries no usable data
    pub exclude: Array2<bool>,
}

/// Projection-based stacker
pub struct ProjectionStacker {
    params: ProjectStackParams,
}

impl ProjectionStacker {
    pub fn new(params: ProjectStackParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(ProjectStackParams::default())
    }

    pub fn params(&self) -> &ProjectStackParams {
        &self.params
    }

    /// Reproject all frames onto the reference grid and combine them.
    ///
    /// Only MEAN and MEDIAN are supported here; any other mode logs a
    /// warning and falls back to MEAN. The combined product carries no
    /// variance plane: uncertainty propagation is the tiled shift path's
    /// job.
    pub fn stack(
        &self,
        frames: &[Frame],
        reference: &Frame,
        hypothesis: &MotionHypothesis,
    ) -> StackResult<StackProduct> {
        let mode = match self.params.mode {
            CombineMode::Mean | CombineMode::Median => self.params.mode,
            other => {
                log::warn!("{} not available for projection stack, setting to MEAN", other);
                CombineMode::Mean
            }
        };
        let components = hypothesis.components();
        let ref_mid = reference.mid_exposure();
        log::info!(
            "projection stacking {} frames at rate ({:.3}, {:.3}) arcsec/hour using {}",
            frames.len(),
            components.dra,
            components.ddec,
            mode
        );

        let (rows, cols) = reference.shape();
        let mut stack = PlaneStack::zeros((frames.len(), rows, cols));
        for (k, frame) in frames.iter().enumerate() {
            let dt = frame.hours_from(ref_mid);
            let spec = frame
                .wcs
                .shifted_reference(components.dra * dt / 3600.0, components.ddec * dt / 3600.0);
            let reprojected = self.reproject_frame(frame, &spec, reference)?;
            stack
                .index_axis_mut(ndarray::Axis(0), k)
                .assign(&reprojected.image);
        }

        let image = match mode {
            CombineMode::Median => nan_median(&stack),
            _ => nan_mean(&stack),
        };
        Ok(StackProduct {
            image,
            variance: None,
            provenance: StackProvenance {
                combine_mode: mode.name().to_string(),
                n_combined: frames.len(),
                rate: hypothesis.rate,
                angle: hypothesis.angle,
                dra: components.dra,
                ddec: components.ddec,
                inputs: frames.iter().map(|f| f.id.clone()).collect(),
            },
        })
    }

    /// Reproject frames onto the reference grid without a motion
    /// hypothesis; the rectification step ahead of pixel-shift stacking.
    pub fn reproject(
        &self,
        frames: &[Frame],
        reference: &Frame,
    ) -> StackResult<Vec<ReprojectedFrame>> {
        frames
            .iter()
            .map(|frame| {
                log::debug!("reprojecting {} onto grid of {}", frame.id, reference.id);
                self.reproject_frame(frame, &frame.wcs, reference)
            })
            .collect()
    }

    /// Backward resampling: walk the reference grid, map each output pixel
    /// through the frame's transform and sample the frame bilinearly.
    /// Plan-flagged input pixels are NaN before interpolation so they
    /// cannot leak into the output.
    fn reproject_frame(
        &self,
        frame: &Frame,
        spec: &WcsSpec,
        reference: &Frame,
    ) -> StackResult<ReprojectedFrame> {
        let ref_wcs = TanWcs::new(&reference.wcs)?;
        let src_wcs = TanWcs::new(spec)?;

        let mut src_image = frame.image.clone();
        let mut src_variance = frame.variance.clone();
        self.params.mask_plan.apply_nan(&mut src_image, &frame.mask);
        self.params
            .mask_plan
            .apply_nan(&mut src_variance, &frame.mask);

        let (rows, cols) = reference.shape();
        let mut image = Plane::from_elem((rows, cols), Pixel::NAN);
        let mut variance = Plane::from_elem((rows, cols), Pixel::NAN);
        for i in 0..rows {
            for j in 0..cols {
                let sky = ref_wcs.pixel_to_sky(PixelPoint {
                    x: j as f64,
                    y: i as f64,
                });
                let p = src_wcs.sky_to_pixel(sky);
                image[[i, j]] = bilinear_interpolate(&src_image, p.x, p.y);
                variance[[i, j]] = bilinear_interpolate(&src_variance, p.x, p.y);
            }
        }

        let exclude = image.mapv(|v| v.is_nan());
        Ok(ReprojectedFrame {
            id: frame.id.clone(),
            image,
            variance,
            exclude,
        })
    }
}

/// Bilinear sample of `image` at fractional position `(x, y)`; NaN when the
/// position falls outside the plane.
fn bilinear_interpolate(image: &Plane, x: f64, y: f64) -> Pixel {
    let (rows, cols) = image.dim();
    // tolerance soaks up round-trip noise in the transform chain at the
    // exact plane boundary
    const EDGE_TOL: f64 = 1e-3;
    if x < -EDGE_TOL || y < -EDGE_TOL {
        return Pixel::NAN;
    }
    let x = x.max(0.0);
    let y = y.max(0.0);
    let x1 = x.floor() as usize;
    let y1 = y.floor() as usize;
    if x1 >= cols || y1 >= rows {
        return Pixel::NAN;
    }
    let x2 = (x1 + 1).min(cols - 1);
    let y2 = (y1 + 1).min(rows - 1);

    let dx = x - x1 as f64;
    let dy = y - y1 as f64;

    let v11 = image[[y1, x1]] as f64;
    let v12 = image[[y2, x1]] as f64;
    let v21 = image[[y1, x2]] as f64;
    let v22 = image[[y2, x2]] as f64;

    let value = v11 * (1.0 - dx) * (1.0 - dy)
        + v21 * dx * (1.0 - dy)
        + v12 * (1.0 - dx) * dy
        + v22 * dx * dy;
    value as Pixel
}
