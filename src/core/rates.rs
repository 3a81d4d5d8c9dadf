//! Motion hypotheses and the (rate, angle) search grid.

use serde::{Deserialize, Serialize};

use crate::types::{StackError, StackResult};

/// A candidate linear sky motion: `rate` in arcsec/hour along bearing
/// `angle` in degrees (measured from the RA axis toward Dec).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionHypothesis {
    pub rate: f64,
    pub angle: f64,
}

impl MotionHypothesis {
    pub fn new(rate: f64, angle: f64) -> Self {
        Self { rate, angle }
    }

    /// Decompose into RA/Dec rate components, arcsec/hour.
    pub fn components(&self) -> RateComponents {
        let angle = self.angle.to_radians();
        RateComponents {
            dra: self.rate * angle.cos(),
            ddec: self.rate * angle.sin(),
        }
    }
}

/// RA/Dec components of a motion hypothesis, arcsec/hour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateComponents {
    pub dra: f64,
    pub ddec: f64,
}

/// Bounds and step sizes of the rate/angle sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateGrid {
    /// Minimum shift rate (arcsec/hour)
    pub rate_min: f64,
    /// Maximum shift rate (arcsec/hour)
    pub rate_max: f64,
    /// Step size for the shift rate (arcsec/hour)
    pub rate_step: f64,
    /// Minimum bearing angle (degrees)
    pub angle_min: f64,
    /// Maximum bearing angle (degrees)
    pub angle_max: f64,
    /// Step size for the bearing angle (degrees)
    pub angle_step: f64,
}

impl Default for RateGrid {
    fn default() -> Self {
        Self {
            rate_min: 1.0,
            rate_max: 5.0,
            rate_step: 0.25,
            angle_min: -3.0,
            angle_max: 3.0,
            angle_step: 0.25,
        }
    }
}

impl RateGrid {
    /// Enumerate the full Cartesian product of linearly spaced rates and
    /// angles, both endpoints inclusive, angle as the outer loop and rate
    /// as the inner loop. The order fixes output-filename sequencing, so
    /// it is part of the contract.
    pub fn generate(&self) -> StackResult<Vec<MotionHypothesis>> {
        let angles = linspace_inclusive(self.angle_min, self.angle_max, self.angle_step)
            .map_err(|e| StackError::Config(format!("angle axis: {}", e)))?;
        let rates = linspace_inclusive(self.rate_min, self.rate_max, self.rate_step)
            .map_err(|e| StackError::Config(format!("rate axis: {}", e)))?;

        let mut hypotheses = Vec::with_capacity(angles.len() * rates.len());
        for &angle in &angles {
            for &rate in &rates {
                hypotheses.push(MotionHypothesis::new(rate, angle));
            }
        }
        log::info!(
            "rate grid: {} angles x {} rates = {} hypotheses",
            angles.len(),
            rates.len(),
            hypotheses.len()
        );
        Ok(hypotheses)
    }
}

/// `round((max - min) / step) + 1` evenly spaced values from `min` to
/// `max`, both included.
fn linspace_inclusive(min: f64, max: f64, step: f64) -> Result<Vec<f64>, String> {
    if !step.is_finite() || step <= 0.0 {
        return Err(format!("step {} must be positive", step));
    }
    if !min.is_finite() || !max.is_finite() || max < min {
        return Err(format!("bounds [{}, {}] are invalid", min, max));
    }
    let count = ((max - min) / step).round() as usize + 1;
    if count == 1 {
        return Ok(vec![min]);
    }
    let span = max - min;
    Ok((0..count)
        .map(|i| min + span * i as f64 / (count - 1) as f64)
        .collect())
}
