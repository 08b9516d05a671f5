//! Values carried in event `data` dictionaries.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::KernelError;

/// A single event data value.
///
/// Arrays are reference counted so that teeing a stream into several
/// branches does not copy image data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    /// Explicit absence of a value (e.g. "no mask").
    Null,
    /// A boolean scalar.
    Bool(bool),
    /// An integer scalar.
    Int(i64),
    /// A floating point scalar.
    Float(f64),
    /// A string.
    Text(String),
    /// A reference to externally stored data, resolved by filling.
    Datum {
        /// Identifier understood by the store's datum registry.
        datum_id: String,
    },
    /// A 2-D detector image.
    Image(Arc<Array2<f64>>),
    /// A 2-D boolean mask, `true` marks a good pixel.
    Mask(Arc<Array2<bool>>),
    /// A 1-D curve such as `q` or `I(q)`.
    Curve(Arc<Array1<f64>>),
    /// Any other structured value (calibration dictionaries, etc.).
    Json(serde_json::Value),
}

impl DataValue {
    /// Wraps an image array.
    #[must_use]
    pub fn image(array: Array2<f64>) -> Self {
        Self::Image(Arc::new(array))
    }

    /// Wraps a mask array.
    #[must_use]
    pub fn mask(array: Array2<bool>) -> Self {
        Self::Mask(Arc::new(array))
    }

    /// Wraps a 1-D curve.
    #[must_use]
    pub fn curve(array: Array1<f64>) -> Self {
        Self::Curve(Arc::new(array))
    }

    /// Creates a datum reference.
    #[must_use]
    pub fn datum(datum_id: impl Into<String>) -> Self {
        Self::Datum {
            datum_id: datum_id.into(),
        }
    }

    /// Short type name used in data keys and error messages.
    #[must_use]
    pub const fn dtype(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::Float(_) => "number",
            Self::Text(_) => "string",
            Self::Datum { .. } => "datum",
            Self::Image(_) | Self::Mask(_) | Self::Curve(_) => "array",
            Self::Json(_) => "object",
        }
    }

    /// Returns the array shape for array values.
    #[must_use]
    pub fn shape(&self) -> Option<Vec<usize>> {
        match self {
            Self::Image(a) => Some(a.shape().to_vec()),
            Self::Mask(a) => Some(a.shape().to_vec()),
            Self::Curve(a) => Some(a.shape().to_vec()),
            _ => None,
        }
    }

    /// Returns true for [`DataValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true if the value still needs to be filled from the store.
    #[must_use]
    pub const fn is_datum(&self) -> bool {
        matches!(self, Self::Datum { .. })
    }

    /// Returns the image array, if this is one.
    #[must_use]
    pub const fn as_image(&self) -> Option<&Arc<Array2<f64>>> {
        match self {
            Self::Image(a) => Some(a),
            _ => None,
        }
    }

    /// Returns the mask array, if this is one.
    #[must_use]
    pub const fn as_mask(&self) -> Option<&Arc<Array2<bool>>> {
        match self {
            Self::Mask(a) => Some(a),
            _ => None,
        }
    }

    /// Returns the curve array, if this is one.
    #[must_use]
    pub const fn as_curve(&self) -> Option<&Arc<Array1<f64>>> {
        match self {
            Self::Curve(a) => Some(a),
            _ => None,
        }
    }

    /// Returns a numeric scalar as `f64`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string value, if this is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Converts the value into a JSON value.
    ///
    /// Arrays are rendered as nested lists.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::json!(b),
            Self::Int(v) => serde_json::json!(v),
            Self::Float(v) => serde_json::json!(v),
            Self::Text(s) => serde_json::json!(s),
            Self::Datum { datum_id } => serde_json::json!({ "datum_id": datum_id }),
            Self::Image(a) => serde_json::json!(a.rows().into_iter().map(|r| r.to_vec()).collect::<Vec<_>>()),
            Self::Mask(a) => serde_json::json!(a.rows().into_iter().map(|r| r.to_vec()).collect::<Vec<_>>()),
            Self::Curve(a) => serde_json::json!(a.to_vec()),
            Self::Json(v) => v.clone(),
        }
    }

    /// Requires an image, naming `field` in the error.
    pub fn expect_image(&self, field: &str) -> Result<&Arc<Array2<f64>>, KernelError> {
        self.as_image().ok_or_else(|| KernelError::WrongType {
            field: field.to_string(),
            expected: "an image",
        })
    }

    /// Requires a mask, naming `field` in the error.
    pub fn expect_mask(&self, field: &str) -> Result<&Arc<Array2<bool>>, KernelError> {
        self.as_mask().ok_or_else(|| KernelError::WrongType {
            field: field.to_string(),
            expected: "a mask",
        })
    }
}

impl From<Array2<f64>> for DataValue {
    fn from(array: Array2<f64>) -> Self {
        Self::image(array)
    }
}

impl From<Array2<bool>> for DataValue {
    fn from(array: Array2<bool>) -> Self {
        Self::mask(array)
    }
}

impl From<Array1<f64>> for DataValue {
    fn from(array: Array1<f64>) -> Self {
        Self::curve(array)
    }
}

impl From<f64> for DataValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<serde_json::Value> for DataValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl From<Option<Array2<bool>>> for DataValue {
    fn from(mask: Option<Array2<bool>>) -> Self {
        mask.map_or(Self::Null, Self::mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_image_accessors() {
        let v = DataValue::image(Array2::ones((2, 3)));
        assert_eq!(v.shape(), Some(vec![2, 3]));
        assert_eq!(v.dtype(), "array");
        assert!(v.as_image().is_some());
        assert!(v.as_mask().is_none());
        assert!(v.expect_mask("mask").is_err());
    }

    #[test]
    fn test_untagged_serde_distinguishes_arrays() {
        let mask = DataValue::mask(array![[true, false], [false, true]]);
        let json = serde_json::to_string(&mask).unwrap();
        let back: DataValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mask);

        let curve = DataValue::curve(array![1.0, 2.0, 3.0]);
        let json = serde_json::to_string(&curve).unwrap();
        let back: DataValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, curve);
    }

    #[test]
    fn test_datum_and_scalars() {
        let v: DataValue = serde_json::from_str(r#"{"datum_id": "abc"}"#).unwrap();
        assert!(v.is_datum());
        let v: DataValue = serde_json::from_str("null").unwrap();
        assert!(v.is_null());
        let v: DataValue = serde_json::from_str("3").unwrap();
        assert_eq!(v.as_f64(), Some(3.0));
        let v: DataValue = serde_json::from_str(r#""pe1""#).unwrap();
        assert_eq!(v.as_str(), Some("pe1"));
    }

    #[test]
    fn test_to_json_renders_nested_lists() {
        let v = DataValue::image(array![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(v.to_json(), serde_json::json!([[1.0, 2.0], [3.0, 4.0]]));
    }
}
