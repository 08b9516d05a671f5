//! Sparse storage of masks in start documents.
//!
//! Only the bad pixels are stored, as the CSR triplet `[data, indices, indptr]`
//! of the inverted mask.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::errors::KernelError;

/// CSR triplet of the bad pixels of a mask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedMask(pub Vec<bool>, pub Vec<usize>, pub Vec<usize>);

impl CompressedMask {
    /// Parses `[data, indices, indptr]`. `data` entries may be booleans or numbers.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, KernelError> {
        let parts = value
            .as_array()
            .filter(|p| p.len() == 3)
            .ok_or_else(|| KernelError::InvalidMask("expected [data, indices, indptr]".to_string()))?;
        let data = parts[0]
            .as_array()
            .ok_or_else(|| KernelError::InvalidMask("data must be a list".to_string()))?
            .iter()
            .map(|v| match v {
                serde_json::Value::Bool(b) => Ok(*b),
                serde_json::Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
                other => Err(KernelError::InvalidMask(format!("bad data entry {other}"))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let indices = index_list(&parts[1], "indices")?;
        let indptr = index_list(&parts[2], "indptr")?;
        Ok(Self(data, indices, indptr))
    }

    /// Number of stored (bad) entries.
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.1.len()
    }
}

fn index_list(value: &serde_json::Value, name: &str) -> Result<Vec<usize>, KernelError> {
    serde_json::from_value(value.clone())
        .map_err(|e| KernelError::InvalidMask(format!("{name}: {e}")))
}

/// Compresses a mask (`true` = good).
#[must_use]
pub fn compress_mask(mask: &Array2<bool>) -> CompressedMask {
    let mut indices = Vec::new();
    let mut indptr = Vec::with_capacity(mask.nrows() + 1);
    indptr.push(0);
    for row in mask.rows() {
        indices.extend(row.iter().enumerate().filter(|&(_, &good)| !good).map(|(j, _)| j));
        indptr.push(indices.len());
    }
    CompressedMask(vec![true; indices.len()], indices, indptr)
}

/// Rebuilds a mask of `shape` (`true` = good).
pub fn decompress_mask(compressed: &CompressedMask, shape: (usize, usize)) -> Result<Array2<bool>, KernelError> {
    let CompressedMask(data, indices, indptr) = compressed;
    let (rows, cols) = shape;
    if indptr.len() != rows + 1 {
        return Err(KernelError::InvalidMask(format!(
            "indptr has {} entries for {rows} rows",
            indptr.len()
        )));
    }
    if data.len() != indices.len() || indptr.last().copied() != Some(indices.len()) {
        return Err(KernelError::InvalidMask("inconsistent CSR lengths".to_string()));
    }
    let mut mask = Array2::from_elem(shape, true);
    for (r, bounds) in indptr.windows(2).enumerate() {
        let (lo, hi) = (bounds[0], bounds[1]);
        if lo > hi || hi > indices.len() {
            return Err(KernelError::InvalidMask(format!("row {r} has bad bounds {lo}..{hi}")));
        }
        for k in lo..hi {
            let c = indices[k];
            if c >= cols {
                return Err(KernelError::InvalidMask(format!("column {c} out of range for {cols} columns")));
            }
            if data[k] {
                mask[(r, c)] = false;
            }
        }
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_compress_stores_bad_pixels() {
        let mask = array![[true, false, true], [false, true, true]];
        let c = compress_mask(&mask);
        assert_eq!(c, CompressedMask(vec![true, true], vec![1, 0], vec![0, 1, 2]));
        assert_eq!(decompress_mask(&c, (2, 3)).unwrap(), mask);
    }

    #[test]
    fn test_from_json_accepts_numeric_data() {
        let json = serde_json::json!([[1, 1], [0, 2], [0, 1, 2]]);
        let c = CompressedMask::from_json(&json).unwrap();
        let mask = decompress_mask(&c, (2, 3)).unwrap();
        assert!(!mask[(0, 0)]);
        assert!(!mask[(1, 2)]);
        assert_eq!(mask.iter().filter(|&&g| g).count(), 4);
    }

    #[test]
    fn test_decompress_validates_shape() {
        let c = compress_mask(&Array2::from_elem((2, 2), false));
        assert!(matches!(
            decompress_mask(&c, (3, 2)),
            Err(KernelError::InvalidMask(_))
        ));
        assert!(decompress_mask(&c, (2, 1)).is_err());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(CompressedMask::from_json(&serde_json::json!({"mask": 1})).is_err());
        assert!(CompressedMask::from_json(&serde_json::json!([["x"], [0], [0, 1]])).is_err());
    }
}
