//! Detector calibration parameters.

use serde::{Deserialize, Serialize};

use crate::core::StartDoc;
use crate::errors::KernelError;

/// Start document keys that may hold calibration parameters, in lookup order.
pub const CALIBRATION_KEYS: [&str; 2] = ["calibration_md", "sc_calibration_md"];

/// Detector shape assumed when the image shape is not known yet.
pub const DEFAULT_DETECTOR_SHAPE: (usize, usize) = (2048, 2048);

/// pyFAI-style detector geometry.
///
/// Lengths are in metres and angles in radians. `centerX`/`centerY` are the
/// Fit2D beam centre in pixels, present when the calibration was refined with
/// a Fit2D-compatible tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Sample to point-of-normal-incidence distance.
    pub dist: f64,
    /// PONI along the slow (row) axis.
    pub poni1: f64,
    /// PONI along the fast (column) axis.
    pub poni2: f64,
    /// Rotation about the vertical axis.
    #[serde(default)]
    pub rot1: f64,
    /// Rotation about the horizontal axis.
    #[serde(default)]
    pub rot2: f64,
    /// Rotation about the beam.
    #[serde(default)]
    pub rot3: f64,
    /// Pixel height.
    #[serde(default = "default_pixel")]
    pub pixel1: f64,
    /// Pixel width.
    #[serde(default = "default_pixel")]
    pub pixel2: f64,
    /// X-ray wavelength.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wavelength: Option<f64>,
    /// Fit2D beam centre column.
    #[serde(default, rename = "centerX", skip_serializing_if = "Option::is_none")]
    pub center_x: Option<f64>,
    /// Fit2D beam centre row.
    #[serde(default, rename = "centerY", skip_serializing_if = "Option::is_none")]
    pub center_y: Option<f64>,
    /// Detector model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detector: Option<String>,
}

const fn default_pixel() -> f64 {
    200e-6
}

impl Calibration {
    /// Creates a calibration with no rotations and the default pixel size.
    #[must_use]
    pub const fn new(dist: f64, poni1: f64, poni2: f64) -> Self {
        Self {
            dist,
            poni1,
            poni2,
            rot1: 0.0,
            rot2: 0.0,
            rot3: 0.0,
            pixel1: default_pixel(),
            pixel2: default_pixel(),
            wavelength: None,
            center_x: None,
            center_y: None,
            detector: None,
        }
    }

    /// Sets the wavelength.
    #[must_use]
    pub const fn with_wavelength(mut self, wavelength: f64) -> Self {
        self.wavelength = Some(wavelength);
        self
    }

    /// Sets the pixel size.
    #[must_use]
    pub const fn with_pixel_size(mut self, pixel1: f64, pixel2: f64) -> Self {
        self.pixel1 = pixel1;
        self.pixel2 = pixel2;
        self
    }

    /// Sets the detector rotations.
    #[must_use]
    pub const fn with_rotations(mut self, rot1: f64, rot2: f64, rot3: f64) -> Self {
        self.rot1 = rot1;
        self.rot2 = rot2;
        self.rot3 = rot3;
        self
    }

    /// Parses a calibration dictionary.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, KernelError> {
        let cal: Self = serde_json::from_value(value.clone())
            .map_err(|e| KernelError::InvalidCalibration(e.to_string()))?;
        cal.validate()?;
        Ok(cal)
    }

    /// Reads the calibration out of a start document.
    ///
    /// Tries `calibration_md` first and falls back to `sc_calibration_md`.
    /// Returns `Ok(None)` when neither key is present.
    pub fn from_start(start: &StartDoc) -> Result<Option<Self>, KernelError> {
        CALIBRATION_KEYS
            .iter()
            .find_map(|key| start.get(key))
            .map(Self::from_json)
            .transpose()
    }

    /// Checks the parameters describe a usable geometry.
    pub fn validate(&self) -> Result<(), KernelError> {
        if !(self.dist.is_finite() && self.dist > 0.0) {
            return Err(KernelError::InvalidCalibration(format!(
                "dist must be positive, got {}",
                self.dist
            )));
        }
        if !(self.pixel1 > 0.0 && self.pixel2 > 0.0) {
            return Err(KernelError::InvalidCalibration(
                "pixel sizes must be positive".to_string(),
            ));
        }
        if let Some(w) = self.wavelength {
            if !(w.is_finite() && w > 0.0) {
                return Err(KernelError::InvalidCalibration(format!(
                    "wavelength must be positive, got {w}"
                )));
            }
        }
        Ok(())
    }

    /// Beam centre in pixels as `(column, row)`.
    ///
    /// Uses the stored Fit2D centre when present, else derives it from the
    /// PONI and the tilt.
    #[must_use]
    pub fn beam_center(&self) -> (f64, f64) {
        match (self.center_x, self.center_y) {
            (Some(x), Some(y)) => (x, y),
            _ => {
                let x = (self.poni2 + self.dist * self.rot1.tan()) / self.pixel2;
                let y = (self.poni1 - self.dist * self.rot2.tan() / self.rot1.cos()) / self.pixel1;
                (x, y)
            }
        }
    }

    /// JSON rendering used as event data.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Number of integration bins for a detector.
///
/// The longest distance from the beam centre to a detector corner bounds the
/// radial range, so one bin per pixel of the detector diagonal is enough.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn default_npt(calibration: &Calibration, shape: Option<(usize, usize)>) -> usize {
    let (rows, cols) = shape.unwrap_or(DEFAULT_DETECTOR_SHAPE);
    let (x0, y0) = calibration.beam_center();
    let center_len = x0.hypot(y0);
    let total_len = (rows as f64).hypot(cols as f64);
    let dist = total_len.max(total_len - center_len);
    dist.ceil().max(1.0) as usize
}
