//! NaN-aware per-pixel combination statistics over a stack of co-registered
//! planes, including the variance-weighted quantile used for robust stacking.

use ndarray::{ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::types::{Pixel, Plane, PlaneStack};

/// Operating point for the weighted-median combiner: slightly above one
/// half so ties break deterministically toward the upper sample.
pub const WEIGHTED_MEDIAN_Q: Pixel = 0.50001;

/// Per-pixel combination statistic. A closed set dispatched through one
/// signature so the combiners stay interchangeable at every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombineMode {
    Mean,
    Median,
    Sum,
    Max,
    /// Inverse-variance weighted quantile at [`WEIGHTED_MEDIAN_Q`]
    WeightedMedian,
}

impl std::fmt::Display for CombineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl CombineMode {
    pub fn name(&self) -> &'static str {
        match self {
            CombineMode::Mean => "MEAN",
            CombineMode::Median => "MEDIAN",
            CombineMode::Sum => "SUM",
            CombineMode::Max => "MAX",
            CombineMode::WeightedMedian => "WEIGHTED_MEDIAN",
        }
    }

    /// Reduce `stack` along its leading (frame) axis to one plane.
    ///
    /// `weights` is consulted only by [`CombineMode::WeightedMedian`];
    /// without weights that mode degrades to the plain median with a
    /// warning.
    pub fn combine(&self, stack: &PlaneStack, weights: Option<&PlaneStack>) -> Plane {
        match self {
            CombineMode::Mean => nan_mean(stack),
            CombineMode::Median => nan_median(stack),
            CombineMode::Sum => nan_sum(stack),
            CombineMode::Max => nan_max(stack),
            CombineMode::WeightedMedian => match weights {
                Some(w) => weighted_quantile(stack, WEIGHTED_MEDIAN_Q, w),
                None => {
                    log::warn!("WEIGHTED_MEDIAN requested without weights, using MEDIAN");
                    nan_median(stack)
                }
            },
        }
    }
}

fn finite_lane_stats(lane: ArrayView1<'_, Pixel>) -> (f64, u32) {
    let mut sum = 0.0f64;
    let mut count = 0u32;
    for &v in lane {
        if !v.is_nan() {
            sum += v as f64;
            count += 1;
        }
    }
    (sum, count)
}

/// Per-pixel mean ignoring NaN samples; NaN only where every sample is NaN.
pub fn nan_mean(stack: &PlaneStack) -> Plane {
    stack.map_axis(Axis(0), |lane| {
        let (sum, count) = finite_lane_stats(lane);
        if count == 0 {
            Pixel::NAN
        } else {
            (sum / count as f64) as Pixel
        }
    })
}

/// Per-pixel sum ignoring NaN samples; NaN only where every sample is NaN.
pub fn nan_sum(stack: &PlaneStack) -> Plane {
    stack.map_axis(Axis(0), |lane| {
        let (sum, count) = finite_lane_stats(lane);
        if count == 0 {
            Pixel::NAN
        } else {
            sum as Pixel
        }
    })
}

/// Per-pixel maximum ignoring NaN samples; NaN only where every sample is NaN.
pub fn nan_max(stack: &PlaneStack) -> Plane {
    stack.map_axis(Axis(0), |lane| {
        lane.iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(Pixel::NAN, Pixel::max)
    })
}

/// Per-pixel median ignoring NaN samples, averaging the two central values
/// for even counts; NaN only where every sample is NaN.
pub fn nan_median(stack: &PlaneStack) -> Plane {
    stack.map_axis(Axis(0), |lane| {
        let mut values: Vec<Pixel> = lane.iter().copied().filter(|v| !v.is_nan()).collect();
        median_of(&mut values)
    })
}

fn median_of(values: &mut [Pixel]) -> Pixel {
    if values.is_empty() {
        return Pixel::NAN;
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}

/// Median of a single plane's finite values; NaN for an all-NaN plane.
pub fn nan_median_value(plane: &Plane) -> Pixel {
    let mut values: Vec<Pixel> = plane.iter().copied().filter(|v| !v.is_nan()).collect();
    median_of(&mut values)
}

/// Per-pixel count of non-NaN samples along the leading axis.
pub fn finite_count(stack: &PlaneStack) -> Plane {
    stack.map_axis(Axis(0), |lane| {
        lane.iter().filter(|v| !v.is_nan()).count() as Pixel
    })
}

/// Weighted order-statistic combiner.
///
/// Per pixel the N samples are sorted (NaN values ordering last), weights
/// carried along in the same permutation, infinite weights zeroed, and the
/// running sum `cumsum(w) - w/2` normalized by the total weight; the result
/// is the sample at the first index whose normalized cumulative weight
/// reaches `quantile` (the last sample when none does). NaN weights
/// contribute nothing to the running sum. This is close to, but not
/// exactly, the weighted percentile: it selects an input sample rather than
/// interpolating between samples.
///
/// A pixel whose total weight is zero or not finite yields NaN rather than
/// an error.
pub fn weighted_quantile(values: &PlaneStack, quantile: Pixel, weights: &PlaneStack) -> Plane {
    debug_assert_eq!(values.dim(), weights.dim());
    log::debug!("computing weighted quantile at q={}", quantile);

    let (depth, rows, cols) = values.dim();
    if depth == 0 {
        return Plane::from_elem((rows, cols), Pixel::NAN);
    }
    let mut order: Vec<usize> = Vec::with_capacity(depth);
    Plane::from_shape_fn((rows, cols), |(i, j)| {
        order.clear();
        order.extend(0..depth);
        order.sort_unstable_by(|&a, &b| values[[a, i, j]].total_cmp(&values[[b, i, j]]));

        let mut total = 0.0f64;
        for &k in &order {
            let w = weights[[k, i, j]];
            if w.is_finite() {
                total += w as f64;
            }
        }
        if !(total > 0.0) || !total.is_finite() {
            return Pixel::NAN;
        }

        let mut cumulative = 0.0f64;
        let mut selected = order[depth - 1];
        for &k in &order {
            let w = weights[[k, i, j]];
            let w = if w.is_finite() { w as f64 } else { 0.0 };
            cumulative += w;
            let normalized = (cumulative - 0.5 * w) / total;
            if normalized >= quantile as f64 {
                selected = k;
                break;
            }
        }
        values[[selected, i, j]]
    })
}
