//! Detector geometry: scattering angles, polarization and 1-D integration.
//!
//! [`Geometry`] is the call contract the stages rely on. [`AzimuthalGeometry`]
//! is the reference implementation; an external integrator can be plugged in
//! through [`GeometryFactory`].

use ndarray::{Array1, Array2, Zip};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use super::Calibration;
use crate::errors::KernelError;

/// Radial axis of an integrated curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RadialUnit {
    /// Scattering vector magnitude in inverse nanometres.
    #[default]
    #[serde(rename = "q_nm^-1")]
    QNm,
    /// Scattering angle 2θ in degrees.
    #[serde(rename = "2th_deg")]
    TwoThetaDeg,
}

impl fmt::Display for RadialUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QNm => f.write_str("q_nm^-1"),
            Self::TwoThetaDeg => f.write_str("2th_deg"),
        }
    }
}

/// A detector geometry built from one calibration.
///
/// Implementations may cache per-shape arrays, so one instance is reused for
/// every event of a run.
pub trait Geometry: Send + Sync + fmt::Debug {
    /// The calibration this geometry was built from.
    fn calibration(&self) -> &Calibration;

    /// Polarization factor per pixel for an image of `shape`.
    fn polarization(&self, shape: (usize, usize), factor: f64) -> Result<Array2<f64>, KernelError>;

    /// In-plane distance of each pixel from the PONI, in metres.
    fn radius(&self, shape: (usize, usize)) -> Array2<f64>;

    /// Azimuthally integrates `image` into `npt` bins.
    ///
    /// `excluded` marks pixels to leave out (`true` = excluded). Returns the
    /// bin centres and the mean intensity per bin.
    fn integrate1d(
        &self,
        image: &Array2<f64>,
        npt: usize,
        excluded: Option<&Array2<bool>>,
        unit: RadialUnit,
    ) -> Result<(Array1<f64>, Array1<f64>), KernelError>;

    /// Beam centre in pixels as `(column, row)`.
    fn beam_center(&self) -> (f64, f64) {
        self.calibration().beam_center()
    }
}

/// Builds geometries from calibrations.
pub trait GeometryFactory: Send + Sync {
    /// Builds a geometry, failing on unusable parameters.
    fn build(&self, calibration: &Calibration) -> Result<Arc<dyn Geometry>, KernelError>;
}

/// Factory for the reference [`AzimuthalGeometry`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AzimuthalFactory;

impl GeometryFactory for AzimuthalFactory {
    fn build(&self, calibration: &Calibration) -> Result<Arc<dyn Geometry>, KernelError> {
        Ok(Arc::new(AzimuthalGeometry::new(calibration.clone())?))
    }
}

/// Per-pixel angles for one image shape.
#[derive(Debug)]
struct PixelArrays {
    /// Scattering angle 2θ in radians.
    tth: Array2<f64>,
    /// Azimuthal angle χ in radians.
    chi: Array2<f64>,
    /// In-plane radius in metres.
    radius: Array2<f64>,
}

/// Reference flat-detector geometry with pyFAI's rotation conventions.
///
/// No solid-angle correction is applied during integration.
#[derive(Debug)]
pub struct AzimuthalGeometry {
    calibration: Calibration,
    arrays: Mutex<HashMap<(usize, usize), Arc<PixelArrays>>>,
}

impl AzimuthalGeometry {
    /// Creates a geometry, validating the calibration.
    pub fn new(calibration: Calibration) -> Result<Self, KernelError> {
        calibration.validate()?;
        Ok(Self {
            calibration,
            arrays: Mutex::new(HashMap::new()),
        })
    }

    fn arrays(&self, shape: (usize, usize)) -> Arc<PixelArrays> {
        let mut cache = self.arrays.lock();
        Arc::clone(cache.entry(shape).or_insert_with(|| Arc::new(self.compute(shape))))
    }

    #[allow(clippy::cast_precision_loss)]
    fn compute(&self, shape: (usize, usize)) -> PixelArrays {
        let c = &self.calibration;
        let (s1, c1) = c.rot1.sin_cos();
        let (s2, c2) = c.rot2.sin_cos();
        let (s3, c3) = c.rot3.sin_cos();
        let l = c.dist;
        let mut tth = Array2::zeros(shape);
        let mut chi = Array2::zeros(shape);
        let mut radius = Array2::zeros(shape);
        for ((i, j), t) in tth.indexed_iter_mut() {
            let p1 = (i as f64 + 0.5).mul_add(c.pixel1, -c.poni1);
            let p2 = (j as f64 + 0.5).mul_add(c.pixel2, -c.poni2);
            let t1 = p1 * c2 * c3 + p2 * (c3 * s1 * s2 - c1 * s3) - l * (c1 * c3 * s2 + s1 * s3);
            let t2 = p1 * c2 * s3 + p2 * (c1 * c3 + s1 * s2 * s3) - l * (-c3 * s1 + c1 * s2 * s3);
            let t3 = p1 * s2 - p2 * c2 * s1 + l * c1 * c2;
            let r = t1.hypot(t2);
            *t = r.atan2(t3);
            chi[(i, j)] = t1.atan2(t2);
            radius[(i, j)] = r;
        }
        PixelArrays { tth, chi, radius }
    }

    fn radial(&self, tth: &Array2<f64>, unit: RadialUnit) -> Result<Array2<f64>, KernelError> {
        match unit {
            RadialUnit::TwoThetaDeg => Ok(tth.mapv(f64::to_degrees)),
            RadialUnit::QNm => {
                let wavelength = self.calibration.wavelength.ok_or_else(|| {
                    KernelError::InvalidCalibration("wavelength is required for q".to_string())
                })?;
                let factor = 4.0 * PI / (wavelength * 1e9);
                Ok(tth.mapv(|t| factor * (t / 2.0).sin()))
            }
        }
    }
}

impl Geometry for AzimuthalGeometry {
    fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    fn polarization(&self, shape: (usize, usize), factor: f64) -> Result<Array2<f64>, KernelError> {
        if !(-1.0..=1.0).contains(&factor) {
            return Err(KernelError::InvalidCalibration(format!(
                "polarization factor must be within [-1, 1], got {factor}"
            )));
        }
        let arrays = self.arrays(shape);
        let mut out = Array2::zeros(shape);
        Zip::from(&mut out)
            .and(&arrays.tth)
            .and(&arrays.chi)
            .for_each(|p, &tth, &chi| {
                let cos2 = tth.cos().powi(2);
                let sin2 = tth.sin().powi(2);
                *p = 0.5 * (1.0 + cos2 - factor * (2.0 * chi).cos() * sin2);
            });
        Ok(out)
    }

    fn radius(&self, shape: (usize, usize)) -> Array2<f64> {
        self.arrays(shape).radius.clone()
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn integrate1d(
        &self,
        image: &Array2<f64>,
        npt: usize,
        excluded: Option<&Array2<bool>>,
        unit: RadialUnit,
    ) -> Result<(Array1<f64>, Array1<f64>), KernelError> {
        if npt == 0 {
            return Err(KernelError::InvalidCalibration("npt must be positive".to_string()));
        }
        let shape = image.dim();
        if let Some(mask) = excluded {
            if mask.dim() != shape {
                return Err(KernelError::ShapeMismatch {
                    expected: vec![shape.0, shape.1],
                    found: mask.shape().to_vec(),
                });
            }
        }
        let arrays = self.arrays(shape);
        let radial = self.radial(&arrays.tth, unit)?;
        let keep = |idx: (usize, usize)| excluded.map_or(true, |m| !m[idx]);

        let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
        for (idx, &r) in radial.indexed_iter() {
            if keep(idx) && image[idx].is_finite() {
                lo = lo.min(r);
                hi = hi.max(r);
            }
        }
        if !lo.is_finite() {
            // every pixel excluded
            return Ok((Array1::zeros(npt), Array1::zeros(npt)));
        }
        if hi <= lo {
            hi = lo + f64::EPSILON.max(lo.abs() * 1e-9);
        }
        let width = (hi - lo) / npt as f64;
        let mut sums = vec![0.0; npt];
        let mut counts = vec![0usize; npt];
        for (idx, &r) in radial.indexed_iter() {
            let v = image[idx];
            if !keep(idx) || !v.is_finite() {
                continue;
            }
            let bin = (((r - lo) / width) as usize).min(npt - 1);
            sums[bin] += v;
            counts[bin] += 1;
        }
        let centers = Array1::from_iter((0..npt).map(|b| (b as f64 + 0.5).mul_add(width, lo)));
        let intensity = Array1::from_iter(
            sums.iter()
                .zip(&counts)
                .map(|(&s, &n)| if n == 0 { 0.0 } else { s / n as f64 }),
        );
        Ok((centers, intensity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn centered(shape: (usize, usize)) -> AzimuthalGeometry {
        let pixel = 1e-4;
        #[allow(clippy::cast_precision_loss)]
        let cal = Calibration::new(0.1, shape.0 as f64 * pixel / 2.0, shape.1 as f64 * pixel / 2.0)
            .with_pixel_size(pixel, pixel)
            .with_wavelength(1.8e-11);
        AzimuthalGeometry::new(cal).unwrap()
    }

    #[test]
    fn test_integrate_returns_npt_points() {
        let geo = centered((64, 64));
        let image = Array2::ones((64, 64));
        let (q, iq) = geo.integrate1d(&image, 1500, None, RadialUnit::QNm).unwrap();
        assert_eq!(q.len(), 1500);
        assert_eq!(iq.len(), 1500);
        assert!(q.windows(2).into_iter().all(|w| w[1] > w[0]));
        assert!(iq.iter().all(|&v| v == 0.0 || (v - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_excluded_pixels_are_ignored() {
        let geo = centered((16, 16));
        let mut image = Array2::ones((16, 16));
        image[(0, 0)] = 1e6;
        let mut excluded = Array2::from_elem((16, 16), false);
        excluded[(0, 0)] = true;
        let (_, iq) = geo
            .integrate1d(&image, 10, Some(&excluded), RadialUnit::TwoThetaDeg)
            .unwrap();
        assert!(iq.iter().all(|&v| v <= 1.0));
    }

    #[test]
    fn test_single_radius_lands_in_first_bin() {
        let geo = centered((16, 16));
        let image = Array2::from_elem((16, 16), 5.0);
        let mut excluded = Array2::from_elem((16, 16), true);
        excluded[(3, 4)] = false;
        let (centers, iq) = geo
            .integrate1d(&image, 8, Some(&excluded), RadialUnit::TwoThetaDeg)
            .unwrap();
        assert!(centers.iter().all(|c| c.is_finite()));
        assert!(centers.windows(2).into_iter().all(|w| w[1] > w[0]));
        assert_eq!(iq[0], 5.0);
        assert!(iq.iter().skip(1).all(|&v| v == 0.0));
    }

    #[test]
    fn test_integrate_rejects_mask_shape() {
        let geo = centered((8, 8));
        let image = Array2::ones((8, 8));
        let mask = Array2::from_elem((4, 4), false);
        let err = geo.integrate1d(&image, 10, Some(&mask), RadialUnit::QNm).unwrap_err();
        assert!(matches!(err, KernelError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_q_needs_wavelength() {
        let geo = AzimuthalGeometry::new(Calibration::new(0.1, 0.0, 0.0)).unwrap();
        let image = Array2::ones((4, 4));
        assert!(geo.integrate1d(&image, 4, None, RadialUnit::QNm).is_err());
        assert!(geo.integrate1d(&image, 4, None, RadialUnit::TwoThetaDeg).is_ok());
    }

    #[test]
    fn test_polarization_near_beam_is_one() {
        let geo = centered((32, 32));
        let pol = geo.polarization((32, 32), 0.99).unwrap();
        assert!(pol.iter().all(|&p| p > 0.0 && p <= 1.0 + 1e-12));
        assert!((pol[(16, 16)] - 1.0).abs() < 1e-3);
        assert!(geo.polarization((32, 32), 1.5).is_err());
    }

    #[test]
    fn test_radius_grows_from_poni() {
        let geo = centered((32, 32));
        let r = geo.radius((32, 32));
        assert!(r[(0, 0)] > r[(16, 16)]);
    }

    #[test]
    fn test_unit_serde_names() {
        assert_eq!(serde_json::to_string(&RadialUnit::QNm).unwrap(), r#""q_nm^-1""#);
        let unit: RadialUnit = serde_json::from_str(r#""2th_deg""#).unwrap();
        assert_eq!(unit, RadialUnit::TwoThetaDeg);
    }
}
