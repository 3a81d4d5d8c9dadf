//! Tangent-plane (gnomonic) world coordinate transforms.
//!
//! The stackers only need the narrow pixel<->sky mapping defined by
//! [`SkyProjection`]; a host application with a richer astrometric model can
//! supply its own implementation. [`TanWcs`] is the standard TAN projection
//! built from a [`WcsSpec`] descriptor and is what the crate uses throughout.

use serde::{Deserialize, Serialize};

use crate::types::{StackError, StackResult};

/// Sky coordinate in degrees (ICRS right ascension / declination).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyCoord {
    pub ra: f64,
    pub dec: f64,
}

/// Pixel position; `x` runs along columns, `y` along rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

/// Coordinate-transform descriptor: reference pixel, reference sky
/// coordinate, and the linear pixel-to-intermediate-world matrix in degrees
/// per pixel. Mirrors the CRPIX/CRVAL/CD convention of the host container's
/// headers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WcsSpec {
    pub crpix: [f64; 2],
    pub crval: [f64; 2],
    pub cd: [[f64; 2]; 2],
}

impl WcsSpec {
    pub fn new(crpix: [f64; 2], crval: [f64; 2], cd: [[f64; 2]; 2]) -> Self {
        Self { crpix, crval, cd }
    }

    /// North-up descriptor with a diagonal CD matrix of `pixel_scale_arcsec`.
    pub fn tangent(crpix: [f64; 2], crval: [f64; 2], pixel_scale_arcsec: f64) -> Self {
        let scale = pixel_scale_arcsec / 3600.0;
        Self::new(crpix, crval, [[scale, 0.0], [0.0, scale]])
    }

    /// One arcsec/pixel descriptor anchored at the origin; test fixture.
    pub fn unit() -> Self {
        Self::tangent([0.0, 0.0], [0.0, 0.0], 1.0)
    }

    /// Copy of this descriptor with the reference sky coordinate displaced
    /// by `(dra, ddec)` degrees. Used by the projection path to realize a
    /// motion hypothesis as a header-level coordinate shift.
    pub fn shifted_reference(&self, dra: f64, ddec: f64) -> Self {
        let mut spec = *self;
        spec.crval[0] += dra;
        spec.crval[1] += ddec;
        spec
    }
}

/// The pixel<->sky mapping the stackers depend on.
pub trait SkyProjection {
    fn pixel_to_sky(&self, p: PixelPoint) -> SkyCoord;
    fn sky_to_pixel(&self, c: SkyCoord) -> PixelPoint;
}

/// Gnomonic (TAN) projection with a linear CD matrix.
#[derive(Debug, Clone)]
pub struct TanWcs {
    spec: WcsSpec,
    inv_cd: [[f64; 2]; 2],
    ra0: f64,
    sin_dec0: f64,
    cos_dec0: f64,
}

impl TanWcs {
    pub fn new(spec: &WcsSpec) -> StackResult<Self> {
        let det = spec.cd[0][0] * spec.cd[1][1] - spec.cd[0][1] * spec.cd[1][0];
        if det.abs() < 1e-30 {
            return Err(StackError::Config(
                "singular CD matrix in WCS descriptor".to_string(),
            ));
        }
        let inv_cd = [
            [spec.cd[1][1] / det, -spec.cd[0][1] / det],
            [-spec.cd[1][0] / det, spec.cd[0][0] / det],
        ];
        let dec0 = spec.crval[1].to_radians();
        Ok(Self {
            spec: *spec,
            inv_cd,
            ra0: spec.crval[0].to_radians(),
            sin_dec0: dec0.sin(),
            cos_dec0: dec0.cos(),
        })
    }

    pub fn spec(&self) -> &WcsSpec {
        &self.spec
    }
}

impl SkyProjection for TanWcs {
    fn pixel_to_sky(&self, p: PixelPoint) -> SkyCoord {
        let u = p.x - self.spec.crpix[0];
        let v = p.y - self.spec.crpix[1];
        let xi = (self.spec.cd[0][0] * u + self.spec.cd[0][1] * v).to_radians();
        let eta = (self.spec.cd[1][0] * u + self.spec.cd[1][1] * v).to_radians();

        let denom = self.cos_dec0 - eta * self.sin_dec0;
        let ra = self.ra0 + xi.atan2(denom);
        let dec = (self.sin_dec0 + eta * self.cos_dec0).atan2((xi * xi + denom * denom).sqrt());
        SkyCoord {
            ra: ra.to_degrees(),
            dec: dec.to_degrees(),
        }
    }

    fn sky_to_pixel(&self, c: SkyCoord) -> PixelPoint {
        let ra = c.ra.to_radians();
        let dec = c.dec.to_radians();
        let (sin_dec, cos_dec) = dec.sin_cos();
        let (sin_dra, cos_dra) = (ra - self.ra0).sin_cos();

        // cos of the angular distance to the tangent point; vanishes only
        // 90 degrees away, far outside any frame footprint
        let cos_c = self.sin_dec0 * sin_dec + self.cos_dec0 * cos_dec * cos_dra;
        let xi = (cos_dec * sin_dra / cos_c).to_degrees();
        let eta = ((self.cos_dec0 * sin_dec - self.sin_dec0 * cos_dec * cos_dra) / cos_c)
            .to_degrees();

        let u = self.inv_cd[0][0] * xi + self.inv_cd[0][1] * eta;
        let v = self.inv_cd[1][0] * xi + self.inv_cd[1][1] * eta;
        PixelPoint {
            x: u + self.spec.crpix[0],
            y: v + self.spec.crpix[1],
        }
    }
}
