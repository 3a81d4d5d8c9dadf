//! Integer up-/down-sampling between the native pixel grid and the
//! scale-factor-enlarged grid the shift stacker works on.
//!
//! Up-sampling is pixel replication and down-sampling is block averaging,
//! so sub-pixel motion can be realized as an exact integer shift at the
//! finer resolution and folded back without interpolation error:
//! `down_sample(up_sample(x, f), f) == x` exactly.

use ndarray::{s, ArrayView2};

use crate::types::{Pixel, Plane, StackError, StackResult};

/// Enlarge `input` by pixel replication to `(factor * h, factor * w)`.
pub fn up_sample(input: ArrayView2<'_, Pixel>, factor: usize) -> StackResult<Plane> {
    if factor == 0 {
        return Err(StackError::Config(
            "up-sampling factor must be at least 1".to_string(),
        ));
    }
    let (rows, cols) = input.dim();
    log::debug!(
        "up-sampling {}x{} by {} to {}x{}",
        rows,
        cols,
        factor,
        rows * factor,
        cols * factor
    );

    let mut output = Plane::zeros((rows * factor, cols * factor));
    for ((i, j), &value) in input.indexed_iter() {
        output
            .slice_mut(s![i * factor..(i + 1) * factor, j * factor..(j + 1) * factor])
            .fill(value);
    }
    Ok(output)
}

/// Shrink `input` by averaging `factor x factor` blocks.
///
/// Dimensions that do not divide evenly are truncated to the largest
/// compatible shape; trailing partial blocks are dropped. Block averages
/// propagate NaN, matching the combined-stack semantics where a NaN-tainted
/// block is itself unreliable.
pub fn down_sample(input: ArrayView2<'_, Pixel>, factor: usize) -> StackResult<Plane> {
    if factor == 0 {
        return Err(StackError::Config(
            "down-sampling factor must be at least 1".to_string(),
        ));
    }
    let (rows, cols) = input.dim();
    let out_rows = rows / factor;
    let out_cols = cols / factor;
    if out_rows == 0 || out_cols == 0 {
        return Err(StackError::Config(format!(
            "down-sampling factor {} too large for {}x{} input",
            factor, rows, cols
        )));
    }

    let norm = (factor * factor) as f64;
    let mut output = Plane::zeros((out_rows, out_cols));
    for out_row in 0..out_rows {
        for out_col in 0..out_cols {
            let mut sum = 0.0f64;
            for in_row in out_row * factor..(out_row + 1) * factor {
                for in_col in out_col * factor..(out_col + 1) * factor {
                    sum += input[[in_row, in_col]] as f64;
                }
            }
            output[[out_row, out_col]] = (sum / norm) as Pixel;
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    #[test]
    fn test_up_sample_replicates_blocks() {
        let input = array![[1.0f32, 2.0], [3.0, 4.0]];
        let output = up_sample(input.view(), 2).unwrap();
        assert_eq!(output.dim(), (4, 4));
        assert_eq!(output[[0, 0]], 1.0);
        assert_eq!(output[[1, 1]], 1.0);
        assert_eq!(output[[0, 2]], 2.0);
        assert_eq!(output[[3, 1]], 3.0);
        assert_eq!(output[[2, 3]], 4.0);
    }

    #[test]
    fn test_down_sample_averages_blocks() {
        // same fixture style as a 4x4 block-average check
        let input = Array2::from_shape_vec(
            (4, 4),
            vec![
                1.0, 2.0, 3.0, 4.0, //
                5.0, 6.0, 7.0, 8.0, //
                9.0, 10.0, 11.0, 12.0, //
                13.0, 14.0, 15.0, 16.0,
            ],
        )
        .unwrap();
        let output = down_sample(input.view(), 2).unwrap();
        assert_eq!(output.dim(), (2, 2));
        assert_relative_eq!(output[[0, 0]], 3.5);
        assert_relative_eq!(output[[0, 1]], 5.5);
        assert_relative_eq!(output[[1, 0]], 11.5);
        assert_relative_eq!(output[[1, 1]], 13.5);
    }

    #[test]
    fn test_down_sample_truncates_partial_blocks() {
        let input = Array2::from_shape_fn((5, 7), |(i, j)| (i * 7 + j) as Pixel);
        let output = down_sample(input.view(), 2).unwrap();
        assert_eq!(output.dim(), (2, 3));
        // first block unaffected by truncation
        assert_relative_eq!(output[[0, 0]], (0.0 + 1.0 + 7.0 + 8.0) / 4.0);
    }

    #[test]
    fn test_round_trip_identity() {
        let input = Array2::from_shape_fn((6, 5), |(i, j)| (3 * i + j) as Pixel * 0.25 - 2.0);
        for factor in 1..=4 {
            let up = up_sample(input.view(), factor).unwrap();
            let back = down_sample(up.view(), factor).unwrap();
            assert_eq!(back.dim(), input.dim());
            for (a, b) in back.iter().zip(input.iter()) {
                assert_relative_eq!(*a, *b);
            }
        }
    }

    #[test]
    fn test_factor_one_is_identity() {
        let input = array![[1.0f32, 2.0], [3.0, 4.0]];
        assert_eq!(up_sample(input.view(), 1).unwrap(), input);
        assert_eq!(down_sample(input.view(), 1).unwrap(), input);
    }

    #[test]
    fn test_zero_factor_rejected() {
        let input = array![[1.0f32]];
        assert!(up_sample(input.view(), 0).is_err());
        assert!(down_sample(input.view(), 0).is_err());
    }

    #[test]
    fn test_oversized_factor_rejected() {
        let input = array![[1.0f32, 2.0]];
        assert!(down_sample(input.view(), 2).is_err());
    }

    #[test]
    fn test_down_sample_propagates_nan() {
        let mut input = Array2::from_elem((2, 2), 1.0f32);
        input[[0, 0]] = Pixel::NAN;
        let output = down_sample(input.view(), 2).unwrap();
        assert!(output[[0, 0]].is_nan());
    }
}
