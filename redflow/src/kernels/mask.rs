//! Mask heuristics. Masks use `true` for good pixels.

use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use super::Geometry;

/// Parameters of the composite mask heuristic.
///
/// A `None` or zero value disables that step, matching the detector team's
/// long-standing defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskParams {
    /// Width of the border to mask, in pixels.
    #[serde(default = "default_edge")]
    pub edge: Option<usize>,
    /// Pixels below this value are masked.
    #[serde(default = "default_lower_thresh")]
    pub lower_thresh: Option<f64>,
    /// Pixels above this value are masked.
    #[serde(default)]
    pub upper_thresh: Option<f64>,
    /// Half width of the beamstop polygon.
    #[serde(default = "default_bs_width")]
    pub bs_width: Option<f64>,
    /// Height of the pointed tip of the beamstop polygon.
    #[serde(default = "default_tri_offset")]
    pub tri_offset: Option<f64>,
    /// Extra widening of the beamstop arm towards the detector edge.
    #[serde(default = "default_v_asym")]
    pub v_asym: Option<f64>,
    /// Outlier threshold in standard deviations per radial ring.
    #[serde(default = "default_alpha")]
    pub alpha: Option<f64>,
}

#[allow(clippy::unnecessary_wraps)]
const fn default_edge() -> Option<usize> {
    Some(30)
}

#[allow(clippy::unnecessary_wraps)]
const fn default_lower_thresh() -> Option<f64> {
    Some(0.0)
}

#[allow(clippy::unnecessary_wraps)]
const fn default_bs_width() -> Option<f64> {
    Some(13.0)
}

#[allow(clippy::unnecessary_wraps)]
const fn default_tri_offset() -> Option<f64> {
    Some(13.0)
}

#[allow(clippy::unnecessary_wraps)]
const fn default_v_asym() -> Option<f64> {
    Some(0.0)
}

#[allow(clippy::unnecessary_wraps)]
const fn default_alpha() -> Option<f64> {
    Some(2.5)
}

impl Default for MaskParams {
    fn default() -> Self {
        Self {
            edge: default_edge(),
            lower_thresh: default_lower_thresh(),
            upper_thresh: None,
            bs_width: default_bs_width(),
            tri_offset: default_tri_offset(),
            v_asym: default_v_asym(),
            alpha: default_alpha(),
        }
    }
}

impl MaskParams {
    /// Parameters with every step disabled.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            edge: None,
            lower_thresh: None,
            upper_thresh: None,
            bs_width: None,
            tri_offset: None,
            v_asym: None,
            alpha: None,
        }
    }

    /// Sets the edge width.
    #[must_use]
    pub const fn with_edge(mut self, edge: Option<usize>) -> Self {
        self.edge = edge;
        self
    }

    /// Sets the threshold window.
    #[must_use]
    pub const fn with_thresholds(mut self, lower: Option<f64>, upper: Option<f64>) -> Self {
        self.lower_thresh = lower;
        self.upper_thresh = upper;
        self
    }

    /// Sets the beamstop polygon.
    #[must_use]
    pub const fn with_beamstop(mut self, width: Option<f64>, tri_offset: Option<f64>, v_asym: Option<f64>) -> Self {
        self.bs_width = width;
        self.tri_offset = tri_offset;
        self.v_asym = v_asym;
        self
    }

    /// Sets the outlier threshold.
    #[must_use]
    pub const fn with_alpha(mut self, alpha: Option<f64>) -> Self {
        self.alpha = alpha;
        self
    }
}

/// Masks a border `edge` pixels wide.
#[must_use]
pub fn margin(shape: (usize, usize), edge: usize) -> Array2<bool> {
    let (rows, cols) = shape;
    Array2::from_shape_fn(shape, |(i, j)| {
        i >= edge && j >= edge && i + edge < rows && j + edge < cols
    })
}

/// Even-odd rule point in polygon test. Vertices are `(x, y)` = `(column, row)`.
fn contains_point(vertices: &[(f64, f64)], x: f64, y: f64) -> bool {
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let (xi, yi) = vertices[i];
        let (xj, yj) = vertices[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Masks the beamstop: a pointed arm from the beam centre to the bottom edge.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn beamstop(shape: (usize, usize), center: (f64, f64), width: f64, tri_offset: f64, v_asym: f64) -> Array2<bool> {
    let (cx, cy) = center;
    let bottom = shape.0 as f64;
    let vertices = [
        (cx - width, cy),
        (cx, cy - tri_offset),
        (cx + width, cy),
        (cx + width + v_asym, bottom),
        (cx - width - v_asym, bottom),
    ];
    Array2::from_shape_fn(shape, |(i, j)| !contains_point(&vertices, j as f64, i as f64))
}

/// Masks pixels deviating from their radial ring mean by more than
/// `alpha` standard deviations. Only pixels good in `mask` contribute to
/// the ring statistics.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn binned_outlier(
    image: &Array2<f64>,
    radius: &Array2<f64>,
    alpha: f64,
    bin_width: f64,
    mask: &Array2<bool>,
) -> Array2<bool> {
    let r_min = radius.iter().copied().fold(f64::INFINITY, f64::min);
    let r_max = radius.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !r_min.is_finite() || bin_width <= 0.0 {
        return mask.clone();
    }
    let start = r_min - bin_width / 2.0;
    let nbins = (((r_max + bin_width / 2.0) - start) / bin_width).ceil().max(1.0) as usize;
    let bin_of = |r: f64| (((r - start) / bin_width) as usize).min(nbins - 1);

    let mut sum = vec![0.0; nbins];
    let mut count = vec![0usize; nbins];
    Zip::from(image).and(radius).and(mask).for_each(|&v, &r, &good| {
        if good {
            let b = bin_of(r);
            sum[b] += v;
            count[b] += 1;
        }
    });
    let mean: Vec<f64> = sum
        .iter()
        .zip(&count)
        .map(|(&s, &n)| if n == 0 { 0.0 } else { s / n as f64 })
        .collect();

    let mut sq_dev = vec![0.0; nbins];
    Zip::from(image).and(radius).and(mask).for_each(|&v, &r, &good| {
        if good {
            let b = bin_of(r);
            sq_dev[b] += (v - mean[b]).powi(2);
        }
    });

    let mut out = mask.clone();
    Zip::from(&mut out).and(image).and(radius).for_each(|good, &v, &r| {
        let b = bin_of(r);
        if count[b] == 0 {
            return;
        }
        let std = (sq_dev[b] / count[b] as f64).sqrt();
        // rounding slack so constant rings keep every pixel
        let threshold = alpha.mul_add(std, 16.0 * f64::EPSILON * mean[b].abs());
        *good &= (v - mean[b]).abs() <= threshold;
    });
    out
}

/// The composite mask: edge, thresholds, beamstop and ring outliers,
/// intersected with `base` when given.
#[must_use]
pub fn mask_img(
    image: &Array2<f64>,
    geometry: &dyn Geometry,
    params: &MaskParams,
    base: Option<&Array2<bool>>,
) -> Array2<bool> {
    let shape = image.dim();
    let mut working = base.map_or_else(|| Array2::from_elem(shape, true), Clone::clone);

    if let Some(edge) = params.edge.filter(|&e| e > 0) {
        working &= &margin(shape, edge);
    }
    if let Some(lower) = params.lower_thresh.filter(|&t| t != 0.0) {
        Zip::from(&mut working).and(image).for_each(|m, &v| *m &= v >= lower);
    }
    if let Some(upper) = params.upper_thresh.filter(|&t| t != 0.0) {
        Zip::from(&mut working).and(image).for_each(|m, &v| *m &= v <= upper);
    }
    if let (Some(width), Some(tri), Some(asym)) = (params.bs_width, params.tri_offset, params.v_asym) {
        working &= &beamstop(shape, geometry.beam_center(), width, tri, asym);
    }
    if let Some(alpha) = params.alpha.filter(|&a| a != 0.0) {
        let cal = geometry.calibration();
        let bin_width = cal.pixel1.hypot(cal.pixel2);
        working = binned_outlier(image, &geometry.radius(shape), alpha, bin_width, &working);
    }
    working
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{AzimuthalGeometry, Calibration};

    fn geometry(shape: (usize, usize)) -> AzimuthalGeometry {
        let pixel = 1e-4;
        #[allow(clippy::cast_precision_loss)]
        let cal = Calibration::new(0.1, shape.0 as f64 * pixel / 2.0, shape.1 as f64 * pixel / 2.0)
            .with_pixel_size(pixel, pixel);
        AzimuthalGeometry::new(cal).unwrap()
    }

    #[test]
    fn test_margin() {
        let m = margin((10, 10), 3);
        assert_eq!(m.iter().filter(|&&g| g).count(), 16);
        assert!(!m[(2, 5)]);
        assert!(m[(3, 3)]);
        assert!(m[(6, 6)]);
        assert!(!m[(7, 6)]);
        assert!(margin((4, 4), 2).iter().all(|&g| !g));
    }

    #[test]
    fn test_beamstop_covers_arm_below_center() {
        let m = beamstop((40, 40), (20.0, 20.0), 3.0, 3.0, 0.0);
        assert!(!m[(30, 20)]);
        assert!(m[(10, 20)]);
        assert!(m[(30, 5)]);
    }

    #[test]
    fn test_binned_outlier_flags_hot_pixel() {
        let geo = geometry((32, 32));
        let mut image = Array2::from_shape_fn((32, 32), |(i, j)| 10.0 + ((i * 7 + j * 3) % 5) as f64 * 0.1);
        image[(5, 16)] = 1e4;
        let r = geo.radius((32, 32));
        let out = binned_outlier(&image, &r, 2.5, 1.41e-4, &Array2::from_elem((32, 32), true));
        assert!(!out[(5, 16)]);
        assert!(out.iter().filter(|&&g| g).count() > 900);
    }

    #[test]
    fn test_mask_img_respects_base_and_edge() {
        let geo = geometry((40, 40));
        let image = Array2::ones((40, 40));
        let mut base = Array2::from_elem((40, 40), true);
        base[(20, 10)] = false;
        let params = MaskParams::disabled().with_edge(Some(5));
        let m = mask_img(&image, &geo, &params, Some(&base));
        assert!(!m[(20, 10)]);
        assert!(!m[(0, 20)]);
        assert!(m[(10, 10)]);
        assert_eq!(m, &margin((40, 40), 5) & &base);
    }

    #[test]
    fn test_mask_img_thresholds() {
        let geo = geometry((8, 8));
        let mut image = Array2::from_elem((8, 8), 5.0);
        image[(1, 1)] = 1.0;
        image[(2, 2)] = 100.0;
        let params = MaskParams::disabled().with_thresholds(Some(2.0), Some(50.0));
        let m = mask_img(&image, &geo, &params, None);
        assert!(!m[(1, 1)]);
        assert!(!m[(2, 2)]);
        assert_eq!(m.iter().filter(|&&g| !g).count(), 2);
    }

    #[test]
    fn test_default_params() {
        let p = MaskParams::default();
        assert_eq!(p.edge, Some(30));
        assert_eq!(p.alpha, Some(2.5));
        let parsed: MaskParams = serde_json::from_str(r#"{"edge": null}"#).unwrap();
        assert_eq!(parsed.edge, None);
        assert_eq!(parsed.bs_width, Some(13.0));
    }
}
