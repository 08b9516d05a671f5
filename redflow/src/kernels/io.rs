//! Mask files on disk: Fit2D `.msk` and numpy `.npy`.

use ndarray::Array2;
use ndarray_npy::read_npy;
use std::path::Path;
use tracing::debug;

use crate::errors::ConfigError;

const MSK_MAGIC: [u8; 16] = *b"M\0\0\0A\0\0\0S\0\0\0K\0\0\0";
const MSK_HEADER_LEN: usize = 1024;

fn read_i32_le(bytes: &[u8], offset: usize) -> Option<i32> {
    let raw: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
    Some(i32::from_le_bytes(raw))
}

/// Decodes a Fit2D mask (`true` = good).
///
/// Rows are bit packed, least significant bit first, padded to 32 bits, and
/// stored bottom row first. A set bit marks a bad pixel.
pub fn decode_fit2d_msk(bytes: &[u8]) -> Result<Array2<bool>, String> {
    if bytes.len() < MSK_HEADER_LEN || bytes[..16] != MSK_MAGIC {
        return Err("not a Fit2D mask file".to_string());
    }
    let dims = read_i32_le(bytes, 16).zip(read_i32_le(bytes, 20));
    let (dim1, dim2) = match dims {
        Some((d1, d2)) if d1 > 0 && d2 > 0 => (d1.unsigned_abs() as usize, d2.unsigned_abs() as usize),
        _ => return Err("invalid mask dimensions".to_string()),
    };
    let row_bytes = dim1.div_ceil(32) * 4;
    let body = &bytes[MSK_HEADER_LEN..];
    if body.len() < row_bytes * dim2 {
        return Err(format!(
            "truncated mask data: need {} bytes, found {}",
            row_bytes * dim2,
            body.len()
        ));
    }
    Ok(Array2::from_shape_fn((dim2, dim1), |(i, j)| {
        let stored_row = dim2 - 1 - i;
        let byte = body[stored_row * row_bytes + j / 8];
        byte & (1 << (j % 8)) == 0
    }))
}

/// Reads a Fit2D `.msk` file.
pub fn read_fit2d_msk(path: &Path) -> Result<Array2<bool>, ConfigError> {
    let display = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|e| ConfigError::mask_file(&display, e.to_string()))?;
    decode_fit2d_msk(&bytes).map_err(|reason| ConfigError::mask_file(&display, reason))
}

/// Reads a `.npy` mask. Boolean arrays are used as is; numeric arrays are
/// good where non-zero.
pub fn read_npy_mask(path: &Path) -> Result<Array2<bool>, ConfigError> {
    let display = path.display().to_string();
    if let Ok(mask) = read_npy::<_, Array2<bool>>(path) {
        return Ok(mask);
    }
    match read_npy::<_, Array2<f64>>(path) {
        Ok(values) => Ok(values.mapv(|v| v != 0.0)),
        Err(e) => Err(ConfigError::mask_file(&display, e.to_string())),
    }
}

/// Loads a mask file, picking the format from the extension.
pub fn load_mask_file(path: &Path) -> Result<Array2<bool>, ConfigError> {
    debug!(path = %path.display(), "loading mask file");
    match path.extension().and_then(|e| e.to_str()) {
        Some("msk") => read_fit2d_msk(path),
        _ => read_npy_mask(path),
    }
}
