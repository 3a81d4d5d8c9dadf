//! Tiled shift-and-stack engine.
//!
//! For each motion hypothesis the input frames are shifted to cancel the
//! hypothesized motion and combined. Sub-pixel shifts are realized as
//! integer shifts on a `factor`-times up-sampled grid; the image is
//! processed in padded tiles so peak memory scales with the tile, not the
//! frame.

use ndarray::{s, Array3, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::combine::{finite_count, CombineMode};
use crate::core::rates::MotionHypothesis;
use crate::core::resample::{down_sample, up_sample};
use crate::types::{
    Frame, Pixel, Plane, StackError, StackProduct, StackProvenance, StackResult,
};
use crate::wcs::{PixelPoint, SkyCoord, SkyProjection, TanWcs};

/// Policy for pixels vacated by an integer shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeFill {
    /// Leave vacated pixels at their pre-shift values. Compatible with the
    /// historical same-buffer range-copy implementation; the stale strip is
    /// at most `padding` wide and lies in the trim margin except at frame
    /// boundaries.
    Stale,
    /// Overwrite vacated pixels with NaN so they drop out of the NaN-aware
    /// combiners.
    Nan,
}

/// Shift-stacking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftStackParams {
    /// Up-sampling factor used to realize sub-pixel shifts
    pub factor: usize,
    /// Tile stride in native pixels
    pub section_size: usize,
    /// Symmetric tile padding in native pixels; also the shift budget a
    /// frame must stay within to participate
    pub padding: usize,
    /// Per-pixel combination statistic
    pub mode: CombineMode,
    /// Edge policy for vacated pixels
    pub edge_fill: EdgeFill,
}

impl Default for ShiftStackParams {
    fn default() -> Self {
        Self {
            factor: 3,
            section_size: 1024,
            padding: 130,
            mode: CombineMode::WeightedMedian,
            edge_fill: EdgeFill::Stale,
        }
    }
}

/// Integer shift of one frame on the up-sampled grid, fixed per frame and
/// reused by every tile.
#[derive(Debug, Clone, Copy)]
struct FrameShift {
    index: usize,
    dx: isize,
    dy: isize,
}

/// Half-open output/source/trim ranges of one tile along a single axis.
///
/// `src` extends `out` by the padding, clamped to the frame; `trim` locates
/// the output range inside the padded (native resolution) tile.
#[derive(Debug, Clone, Copy)]
struct AxisSpan {
    out0: usize,
    out1: usize,
    src0: usize,
    src1: usize,
    trim0: usize,
    trim1: usize,
}

fn axis_spans(extent: usize, section: usize, padding: usize) -> Vec<AxisSpan> {
    let mut spans = Vec::new();
    let mut origin = 0;
    while origin < extent {
        let out1 = (origin + section).min(extent);
        let src0 = origin.saturating_sub(padding);
        let src1 = (out1 + padding).min(extent);
        let trim0 = origin - src0;
        spans.push(AxisSpan {
            out0: origin,
            out1,
            src0,
            src1,
            trim0,
            trim1: trim0 + (out1 - origin),
        });
        origin += section;
    }
    spans
}

/// Tiled shift-and-stack processor
pub struct ShiftStacker {
    params: ShiftStackParams,
}

impl ShiftStacker {
    pub fn new(params: ShiftStackParams) -> StackResult<Self> {
        if params.factor == 0 {
            return Err(StackError::Config(
                "up-sampling factor must be at least 1".to_string(),
            ));
        }
        if params.section_size == 0 {
            return Err(StackError::Config(
                "section size must be at least 1".to_string(),
            ));
        }
        Ok(Self { params })
    }

    /// Processor with the standard search parameters.
    pub fn standard() -> Self {
        Self {
            params: ShiftStackParams::default(),
        }
    }

    pub fn params(&self) -> &ShiftStackParams {
        &self.params
    }

    /// Shift every frame against `hypothesis` and combine onto the
    /// reference grid.
    ///
    /// All frames must share the reference frame's plane shape (reproject
    /// them first if they do not). Frames whose required shift exceeds the
    /// padding budget are dropped from the stack with a warning; the
    /// variance plane of the result is the mean input variance divided by
    /// the per-pixel count of contributing frames.
    pub fn stack(
        &self,
        frames: &[Frame],
        reference: &Frame,
        hypothesis: &MotionHypothesis,
    ) -> StackResult<StackProduct> {
        if frames.is_empty() {
            return Err(StackError::Config(
                "cannot stack an empty frame list".to_string(),
            ));
        }
        let shape = reference.shape();
        for frame in frames {
            if frame.shape() != shape {
                return Err(StackError::Shape(format!(
                    "frame {} shape {:?} differs from reference {:?}; \
                     reproject to a common grid before shift stacking",
                    frame.id,
                    frame.shape(),
                    shape
                )));
            }
        }

        let components = hypothesis.components();
        log::info!(
            "combining {} frames using {} while shifting at ({:.3}, {:.3}) arcsec/hour",
            frames.len(),
            self.params.mode,
            components.dra,
            components.ddec
        );

        let plan = self.shift_plan(frames, reference, hypothesis)?;
        if plan.is_empty() {
            return Err(StackError::Processing(
                "every frame exceeded the padding budget for this hypothesis".to_string(),
            ));
        }

        let (rows, cols) = shape;
        let y_spans = axis_spans(rows, self.params.section_size, self.params.padding);
        let x_spans = axis_spans(cols, self.params.section_size, self.params.padding);
        let tiles: Vec<(AxisSpan, AxisSpan)> = y_spans
            .iter()
            .flat_map(|&ys| x_spans.iter().map(move |&xs| (ys, xs)))
            .collect();
        log::debug!(
            "stacking {}x{} output in {} tiles of stride {}",
            rows,
            cols,
            tiles.len(),
            self.params.section_size
        );

        // Tiles are independent; their output regions are disjoint, so the
        // blocks are computed in parallel and pasted sequentially.
        let blocks: Vec<(Plane, Plane)> = tiles
            .par_iter()
            .map(|&(ys, xs)| self.stack_tile(frames, &plan, ys, xs))
            .collect::<StackResult<Vec<_>>>()?;

        let mut image = Plane::zeros(shape);
        let mut variance = Plane::zeros(shape);
        for (&(ys, xs), (img_block, var_block)) in tiles.iter().zip(blocks) {
            image
                .slice_mut(s![ys.out0..ys.out1, xs.out0..xs.out1])
                .assign(&img_block);
            variance
                .slice_mut(s![ys.out0..ys.out1, xs.out0..xs.out1])
                .assign(&var_block);
        }

        Ok(StackProduct {
            image,
            variance: Some(variance),
            provenance: StackProvenance {
                combine_mode: self.params.mode.name().to_string(),
                n_combined: frames.len(),
                rate: hypothesis.rate,
                angle: hypothesis.angle,
                dra: components.dra,
                ddec: components.ddec,
                inputs: frames.iter().map(|f| f.id.clone()).collect(),
            },
        })
    }

    /// Per-frame integer shifts on the up-sampled grid.
    ///
    /// The displacement field is uniform over a frame at search scales, so
    /// one fiducial evaluation per frame is computed here and reused by
    /// every tile. The frame's own transform converts the angular offset
    /// into pixels, which keeps differing detector orientations honest.
    fn shift_plan(
        &self,
        frames: &[Frame],
        reference: &Frame,
        hypothesis: &MotionHypothesis,
    ) -> StackResult<Vec<FrameShift>> {
        let components = hypothesis.components();
        let ref_wcs = TanWcs::new(&reference.wcs)?;
        let ref_mid = reference.mid_exposure();
        let (rows, cols) = reference.shape();
        let fiducial = PixelPoint {
            x: cols as f64 / 2.0,
            y: rows as f64 / 2.0,
        };
        let ref_sky = ref_wcs.pixel_to_sky(fiducial);
        log::debug!(
            "reference {} mid-exposure {} fiducial ({:.5}, {:.5}) deg",
            reference.id,
            ref_mid,
            ref_sky.ra,
            ref_sky.dec
        );

        let budget = self.params.padding as isize;
        let mut plan = Vec::with_capacity(frames.len());
        for (index, frame) in frames.iter().enumerate() {
            let wcs = TanWcs::new(&frame.wcs)?;
            let dt = frame.hours_from(ref_mid);
            let sky = wcs.pixel_to_sky(fiducial);
            // hypothesized motion over dt, plus the offset that aligns this
            // frame's grid with the reference grid (degrees)
            let dra = components.dra * dt / 3600.0 - (ref_sky.ra - sky.ra);
            let ddec = components.ddec * dt / 3600.0 - (ref_sky.dec - sky.dec);
            let origin = wcs.sky_to_pixel(sky);
            let moved = wcs.sky_to_pixel(SkyCoord {
                ra: sky.ra + dra,
                dec: sky.dec + ddec,
            });
            let dx = (self.params.factor as f64 * (moved.x - origin.x)).round() as isize;
            let dy = (self.params.factor as f64 * (moved.y - origin.y)).round() as isize;
            if dx.abs() > budget || dy.abs() > budget {
                log::warn!(
                    "skipping {} due to large offset ({}, {})",
                    frame.id,
                    dx,
                    dy
                );
                continue;
            }
            log::debug!(
                "frame {} dt {:+.3} h shifts by ({}, {}) up-sampled pixels",
                frame.id,
                dt,
                dx,
                dy
            );
            plan.push(FrameShift { index, dx, dy });
        }
        Ok(plan)
    }

    /// Shift, stack and combine one padded tile; returns the trimmed
    /// native-resolution image and variance blocks for its output region.
    fn stack_tile(
        &self,
        frames: &[Frame],
        plan: &[FrameShift],
        ys: AxisSpan,
        xs: AxisSpan,
    ) -> StackResult<(Plane, Plane)> {
        let factor = self.params.factor;
        let tile_rows = (ys.src1 - ys.src0) * factor;
        let tile_cols = (xs.src1 - xs.src0) * factor;

        let mut images = Array3::<Pixel>::zeros((plan.len(), tile_rows, tile_cols));
        let mut variances = Array3::<Pixel>::zeros((plan.len(), tile_rows, tile_cols));
        for (k, shift) in plan.iter().enumerate() {
            let frame = &frames[shift.index];

            let mut img = up_sample(
                frame.image.slice(s![ys.src0..ys.src1, xs.src0..xs.src1]),
                factor,
            )?;
            apply_shift(&mut img, shift.dx, shift.dy, self.params.edge_fill);
            images.index_axis_mut(Axis(0), k).assign(&img);

            let mut var = up_sample(
                frame.variance.slice(s![ys.src0..ys.src1, xs.src0..xs.src1]),
                factor,
            )?;
            apply_shift(&mut var, shift.dx, shift.dy, self.params.edge_fill);
            variances.index_axis_mut(Axis(0), k).assign(&var);
        }

        let contributing = finite_count(&images);
        let combined = match self.params.mode {
            CombineMode::WeightedMedian => {
                let weights = variances.mapv(|v| 1.0 / v);
                self.params.mode.combine(&images, Some(&weights))
            }
            mode => mode.combine(&images, None),
        };
        // propagated uncertainty of the averaged stack
        let mut combined_variance = CombineMode::Mean.combine(&variances, None);
        combined_variance.zip_mut_with(&contributing, |v, &n| *v /= n);

        let img_block = down_sample(combined.view(), factor)?;
        let var_block = down_sample(combined_variance.view(), factor)?;
        Ok((
            img_block
                .slice(s![ys.trim0..ys.trim1, xs.trim0..xs.trim1])
                .to_owned(),
            var_block
                .slice(s![ys.trim0..ys.trim1, xs.trim0..xs.trim1])
                .to_owned(),
        ))
    }
}

/// Apply an integer shift as a paired source/destination range copy per
/// axis. Pixels outside the destination window are governed by `fill`.
fn apply_shift(plane: &mut Plane, dx: isize, dy: isize, fill: EdgeFill) {
    if dx == 0 && dy == 0 {
        return;
    }
    let (rows, cols) = plane.dim();
    if dy.unsigned_abs() >= rows || dx.unsigned_abs() >= cols {
        // no overlap between source and destination windows
        if fill == EdgeFill::Nan {
            plane.fill(Pixel::NAN);
        }
        return;
    }

    let (dst_y, src_y) = shift_ranges(rows, dy);
    let (dst_x, src_x) = shift_ranges(cols, dx);
    let source = plane
        .slice(s![src_y.0..src_y.1, src_x.0..src_x.1])
        .to_owned();
    plane
        .slice_mut(s![dst_y.0..dst_y.1, dst_x.0..dst_x.1])
        .assign(&source);

    if fill == EdgeFill::Nan {
        if dy > 0 {
            plane.slice_mut(s![..dst_y.0, ..]).fill(Pixel::NAN);
        } else if dy < 0 {
            plane.slice_mut(s![dst_y.1.., ..]).fill(Pixel::NAN);
        }
        if dx > 0 {
            plane.slice_mut(s![.., ..dst_x.0]).fill(Pixel::NAN);
        } else if dx < 0 {
            plane.slice_mut(s![.., dst_x.1..]).fill(Pixel::NAN);
        }
    }
}

/// Destination and source half-open ranges realizing `offset` along one
/// axis of length `extent`.
fn shift_ranges(extent: usize, offset: isize) -> ((usize, usize), (usize, usize)) {
    if offset > 0 {
        let offset = offset as usize;
        ((offset, extent), (0, extent - offset))
    } else if offset < 0 {
        let offset = offset.unsigned_abs();
        ((0, extent - offset), (offset, extent))
    } else {
        ((0, extent), (0, extent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExposureSpan;
    use crate::wcs::WcsSpec;
    use approx::assert_relative_eq;
    use chrono::{DateTime, TimeZone, Utc};
    use ndarray::{array, Array2};

    fn utc(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap()
    }

    fn frame(id: &str, start_hour: u32, shape: (usize, usize), value: Pixel) -> Frame {
        Frame::new(
            id,
            Array2::from_elem(shape, value),
            Array2::ones(shape),
            Array2::zeros(shape),
            ExposureSpan::new(utc(start_hour), utc(start_hour + 1)),
            WcsSpec::tangent([shape.1 as f64 / 2.0, shape.0 as f64 / 2.0], [15.0, 2.0], 1.0),
        )
        .unwrap()
    }

    #[test]
    fn test_shift_ranges() {
        assert_eq!(shift_ranges(10, 3), ((3, 10), (0, 7)));
        assert_eq!(shift_ranges(10, -2), ((0, 8), (2, 10)));
        assert_eq!(shift_ranges(10, 0), ((0, 10), (0, 10)));
    }

    #[test]
    fn test_apply_shift_stale_keeps_vacated_values() {
        let mut plane = array![
            [1.0f32, 2.0, 3.0],
            [4.0, 5.0, 6.0],
            [7.0, 8.0, 9.0]
        ];
        apply_shift(&mut plane, 1, 0, EdgeFill::Stale);
        // data moved right by one; the vacated first column keeps its
        // pre-shift values
        assert_eq!(
            plane,
            array![
                [1.0f32, 1.0, 2.0],
                [4.0, 4.0, 5.0],
                [7.0, 7.0, 8.0]
            ]
        );
    }

    #[test]
    fn test_apply_shift_nan_blanks_vacated_strip() {
        let mut plane = array![
            [1.0f32, 2.0, 3.0],
            [4.0, 5.0, 6.0],
            [7.0, 8.0, 9.0]
        ];
        apply_shift(&mut plane, 0, -1, EdgeFill::Nan);
        assert_eq!(plane.slice(s![0..2, ..]), array![[4.0f32, 5.0, 6.0], [7.0, 8.0, 9.0]]);
        assert!(plane.row(2).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_apply_shift_without_overlap() {
        let mut stale = array![[1.0f32, 2.0], [3.0, 4.0]];
        apply_shift(&mut stale, 5, 0, EdgeFill::Stale);
        assert_eq!(stale, array![[1.0f32, 2.0], [3.0, 4.0]]);

        let mut blank = array![[1.0f32, 2.0], [3.0, 4.0]];
        apply_shift(&mut blank, 5, 0, EdgeFill::Nan);
        assert!(blank.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_axis_spans_interior_and_boundary() {
        let spans = axis_spans(100, 40, 10);
        assert_eq!(spans.len(), 3);
        // first tile clamps the leading pad
        assert_eq!(
            (spans[0].out0, spans[0].out1, spans[0].src0, spans[0].src1),
            (0, 40, 0, 50)
        );
        assert_eq!((spans[0].trim0, spans[0].trim1), (0, 40));
        // interior tile carries full padding
        assert_eq!(
            (spans[1].out0, spans[1].out1, spans[1].src0, spans[1].src1),
            (40, 80, 30, 90)
        );
        assert_eq!((spans[1].trim0, spans[1].trim1), (10, 50));
        // trailing tile is short and clamps the trailing pad
        assert_eq!(
            (spans[2].out0, spans[2].out1, spans[2].src0, spans[2].src1),
            (80, 100, 70, 100)
        );
    }

    #[test]
    fn test_zero_rate_identical_grids_needs_no_shift() {
        let frames: Vec<Frame> = (0..3).map(|k| frame(&format!("f{}", k), 1 + 2 * k as u32, (8, 8), 1.0)).collect();
        let stacker = ShiftStacker::standard();
        let plan = stacker
            .shift_plan(&frames, &frames[1], &MotionHypothesis::new(0.0, 0.0))
            .unwrap();
        assert_eq!(plan.len(), 3);
        assert!(plan.iter().all(|s| s.dx == 0 && s.dy == 0));
    }

    #[test]
    fn test_shift_budget_boundary() {
        // a pixel-scale hypothesis: 1 arcsec/hour is one native pixel/hour
        // under the unit WCS; frames 2 hours from reference at factor 1
        // shift by 2 up-sampled pixels
        let params = ShiftStackParams {
            factor: 1,
            section_size: 8,
            padding: 2,
            mode: CombineMode::Mean,
            edge_fill: EdgeFill::Stale,
        };
        let frames = vec![
            frame("early", 1, (8, 8), 1.0),
            frame("ref", 3, (8, 8), 1.0),
            frame("late", 5, (8, 8), 1.0),
        ];
        let stacker = ShiftStacker::new(params.clone()).unwrap();
        // shift magnitude == padding: retained
        let plan = stacker
            .shift_plan(&frames, &frames[1], &MotionHypothesis::new(1.0, 0.0))
            .unwrap();
        assert_eq!(plan.len(), 3);

        // one pixel beyond the budget: the two offset frames drop
        let tight = ShiftStacker::new(ShiftStackParams {
            padding: 1,
            ..params
        })
        .unwrap();
        let plan = tight
            .shift_plan(&frames, &frames[1], &MotionHypothesis::new(1.0, 0.0))
            .unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_stack_mean_of_identical_frames() {
        let frames: Vec<Frame> = (0..3)
            .map(|k| frame(&format!("f{}", k), 1 + k as u32, (12, 12), 2.5))
            .collect();
        let stacker = ShiftStacker::new(ShiftStackParams {
            factor: 2,
            section_size: 6,
            padding: 2,
            mode: CombineMode::Mean,
            edge_fill: EdgeFill::Stale,
        })
        .unwrap();
        let product = stacker
            .stack(&frames, &frames[1], &MotionHypothesis::new(0.0, 0.0))
            .unwrap();
        for &v in product.image.iter() {
            assert_relative_eq!(v, 2.5, epsilon = 1e-6);
        }
        // mean variance of ones over three contributing frames
        let variance = product.variance.unwrap();
        for &v in variance.iter() {
            assert_relative_eq!(v, 1.0 / 3.0, epsilon = 1e-6);
        }
        assert_eq!(product.provenance.n_combined, 3);
        assert_eq!(product.provenance.combine_mode, "MEAN");
    }

    #[test]
    fn test_stack_rejects_mismatched_shapes() {
        let frames = vec![frame("a", 1, (8, 8), 1.0), frame("b", 2, (10, 10), 1.0)];
        let stacker = ShiftStacker::standard();
        let result = stacker.stack(&frames, &frames[0], &MotionHypothesis::new(0.0, 0.0));
        assert!(matches!(result, Err(StackError::Shape(_))));
    }

    #[test]
    fn test_stack_errors_when_every_frame_skips() {
        let params = ShiftStackParams {
            factor: 1,
            section_size: 8,
            padding: 0,
            mode: CombineMode::Mean,
            edge_fill: EdgeFill::Stale,
        };
        let frames = vec![frame("early", 1, (8, 8), 1.0), frame("late", 5, (8, 8), 1.0)];
        // reference between the two frames so both need a nonzero shift
        let reference = frame("ref", 3, (8, 8), 1.0);
        let stacker = ShiftStacker::new(params).unwrap();
        let result = stacker.stack(&frames, &reference, &MotionHypothesis::new(3.0, 0.0));
        assert!(matches!(result, Err(StackError::Processing(_))));
    }
}
