//! The provenance sub-document of a derived start document.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

/// How a derived run was produced.
///
/// Together with `parents` on the start document this is enough to replay
/// the processing exactly: which stage ran, which transform it applied, the
/// names of the streams it consumed and every parameter it was given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Stage name (e.g. `dark_subtraction`).
    pub hfi: String,
    /// Module that defines the stage.
    pub hfi_module: String,
    /// Name of the per-event transform.
    pub process: String,
    /// Module that defines the transform.
    pub process_module: String,
    /// Positional arguments, rarely used.
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    /// The stage's parameter record, verbatim.
    #[serde(default)]
    pub kwargs: serde_json::Value,
    /// Names of the input streams, in the order their starts were consumed.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Hex SHA-256 of `process` and `kwargs`.
    #[serde(default)]
    pub digest: String,
}

impl Provenance {
    /// Creates a provenance record for `hfi` applying `process`.
    #[must_use]
    pub fn new(hfi: impl Into<String>, process: impl Into<String>) -> Self {
        let mut record = Self {
            hfi: hfi.into(),
            hfi_module: "redflow::stages".to_string(),
            process: process.into(),
            process_module: "redflow::kernels".to_string(),
            args: Vec::new(),
            kwargs: serde_json::Value::Object(serde_json::Map::new()),
            inputs: Vec::new(),
            digest: String::new(),
        };
        record.digest = record.compute_digest();
        record
    }

    /// Sets the module names.
    #[must_use]
    pub fn with_modules(mut self, hfi_module: impl Into<String>, process_module: impl Into<String>) -> Self {
        self.hfi_module = hfi_module.into();
        self.process_module = process_module.into();
        self
    }

    /// Embeds a serializable parameter record as `kwargs`.
    ///
    /// A record that cannot be serialized is logged and stored as `null`.
    #[must_use]
    pub fn with_kwargs<T: Serialize>(mut self, config: &T) -> Self {
        self.kwargs = match serde_json::to_value(config) {
            Ok(value) => value,
            Err(e) => {
                warn!(stage = %self.hfi, error = %e, "parameters could not be recorded");
                serde_json::Value::Null
            }
        };
        self.digest = self.compute_digest();
        self
    }

    /// Adds positional arguments.
    #[must_use]
    pub fn with_args(mut self, args: Vec<serde_json::Value>) -> Self {
        self.args = args;
        self.digest = self.compute_digest();
        self
    }

    /// Names the input streams.
    #[must_use]
    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if both records describe the same processing.
    #[must_use]
    pub fn same_processing(&self, other: &Self) -> bool {
        self.hfi == other.hfi && self.digest == other.digest
    }

    fn compute_digest(&self) -> String {
        // serde_json maps are ordered, so the rendering is canonical
        let payload = serde_json::json!({
            "process": self.process,
            "args": self.args,
            "kwargs": self.kwargs,
        });
        let mut hasher = Sha256::new();
        hasher.update(payload.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}
