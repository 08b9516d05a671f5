//! Numerical kernels called by the stages.
//!
//! Every kernel is a pure function of its inputs (geometries cache derived
//! arrays but never change their results). Errors are [`KernelError`]s,
//! which a stage turns into the `reason` of a failed run.
//!
//! [`KernelError`]: crate::errors::KernelError

mod calibration;
mod compress;
mod correction;
mod geometry;
mod io;
mod mask;

pub use calibration::{default_npt, Calibration, CALIBRATION_KEYS, DEFAULT_DETECTOR_SHAPE};
pub use compress::{compress_mask, decompress_mask, CompressedMask};
pub use correction::{correct_polarization, subtract, subtract_scaled};
pub use geometry::{AzimuthalFactory, AzimuthalGeometry, Geometry, GeometryFactory, RadialUnit};
pub use io::{decode_fit2d_msk, load_mask_file, read_fit2d_msk, read_npy_mask};
pub use mask::{beamstop, binned_outlier, margin, mask_img, MaskParams};
