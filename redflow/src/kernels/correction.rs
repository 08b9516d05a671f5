//! Per-pixel image arithmetic.

use ndarray::Array2;

use super::Geometry;
use crate::errors::KernelError;

fn check_shape(expected: &Array2<f64>, found: &Array2<f64>) -> Result<(), KernelError> {
    if expected.dim() == found.dim() {
        Ok(())
    } else {
        Err(KernelError::ShapeMismatch {
            expected: expected.shape().to_vec(),
            found: found.shape().to_vec(),
        })
    }
}

/// `light - dark`.
pub fn subtract(light: &Array2<f64>, dark: &Array2<f64>) -> Result<Array2<f64>, KernelError> {
    check_shape(light, dark)?;
    Ok(light - dark)
}

/// `foreground - background * scale`.
pub fn subtract_scaled(
    foreground: &Array2<f64>,
    background: &Array2<f64>,
    scale: f64,
) -> Result<Array2<f64>, KernelError> {
    check_shape(foreground, background)?;
    Ok(foreground - &(background * scale))
}

/// Divides `image` by the geometry's polarization factor.
pub fn correct_polarization(
    geometry: &dyn Geometry,
    image: &Array2<f64>,
    polarization_factor: f64,
) -> Result<Array2<f64>, KernelError> {
    let pol = geometry.polarization(image.dim(), polarization_factor)?;
    Ok(image / &pol)
}
