//! Error types for the redflow reduction engine.
//!
//! Only configuration problems are returned synchronously to callers. Every
//! failure that happens while a stage is pulling documents is converted into
//! a `failure` stop document by the stage engine instead of being propagated.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::core::DocKind;

/// The main error type for redflow operations.
#[derive(Debug, Error)]
pub enum RedflowError {
    /// Invalid configuration detected while constructing a stage or pipeline.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A document stream did not obey the start/descriptor/event/stop protocol.
    #[error("{0}")]
    Protocol(#[from] ProtocolError),

    /// The document store failed to answer a query or replay a run.
    #[error("{0}")]
    Broker(#[from] BrokerError),

    /// A numerical kernel rejected its inputs.
    #[error("{0}")]
    Kernel(#[from] KernelError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A dark run was handed to the reduction pipeline.
    #[error("Run {0} is a dark and is not reduced")]
    DarkRun(String),

    /// A batch worker panicked or was cancelled.
    #[error("Worker task failed: {0}")]
    Task(String),
}

/// Metadata about a configuration error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ConfigErrorInfo {
    /// Error code (e.g., "CONFIG-MASK-SENTINEL").
    pub code: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl ConfigErrorInfo {
    /// Creates a new error info with the given code.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            fix_hint: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a stage or pipeline is constructed with invalid settings.
///
/// These are raised immediately at construction time, never mid-stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ConfigError {
    /// The error message.
    pub message: String,
    /// Structured diagnostics.
    pub info: ConfigErrorInfo,
}

impl ConfigError {
    /// Creates a new configuration error with a generic code.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            info: ConfigErrorInfo::new("CONFIG-INVALID"),
        }
    }

    /// Sets the structured diagnostics.
    #[must_use]
    pub fn with_info(mut self, info: ConfigErrorInfo) -> Self {
        self.info = info;
        self
    }

    /// An unrecognized mask sentinel string.
    #[must_use]
    pub fn unknown_mask_setting(value: &str) -> Self {
        Self::new(format!("Unrecognized mask setting '{value}'")).with_info(
            ConfigErrorInfo::new("CONFIG-MASK-SENTINEL")
                .with_context_entry("value", value)
                .with_fix_hint(
                    "Use 'default', 'auto', 'None', or a path to an existing .msk/.npy file.",
                ),
        )
    }

    /// A stage received a different number of input streams than it needs.
    #[must_use]
    pub fn stream_count(stage: &str, expected: usize, found: usize) -> Self {
        Self::new(format!(
            "Stage '{stage}' expects {expected} input streams, got {found}"
        ))
        .with_info(
            ConfigErrorInfo::new("CONFIG-STREAM-COUNT")
                .with_context_entry("stage", stage)
                .with_context_entry("expected", expected.to_string())
                .with_context_entry("found", found.to_string()),
        )
    }

    /// A parameter value is outside its valid range.
    #[must_use]
    pub fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(format!("Invalid parameter '{name}': {reason}")).with_info(
            ConfigErrorInfo::new("CONFIG-PARAMETER").with_context_entry("parameter", name),
        )
    }

    /// A mask file could not be read.
    #[must_use]
    pub fn mask_file(path: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(format!("Cannot read mask file '{path}': {reason}")).with_info(
            ConfigErrorInfo::new("CONFIG-MASK-FILE").with_context_entry("path", path),
        )
    }
}

/// A document stream broke the per-run document protocol.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A document of the wrong kind arrived.
    #[error("Expected {expected} document from '{input}', got '{found}'")]
    UnexpectedDocument {
        /// Which input stream produced the document.
        input: String,
        /// What the stage was waiting for.
        expected: String,
        /// The kind that actually arrived.
        found: DocKind,
    },

    /// The stream ended before the run was complete.
    #[error("Stream '{input}' ended while waiting for {expected}")]
    Exhausted {
        /// Which input stream ended.
        input: String,
        /// What the stage was waiting for.
        expected: String,
    },
}

impl ProtocolError {
    /// Creates an unexpected-document error.
    #[must_use]
    pub fn unexpected(input: impl Into<String>, expected: impl Into<String>, found: DocKind) -> Self {
        Self::UnexpectedDocument {
            input: input.into(),
            expected: expected.into(),
            found,
        }
    }

    /// Creates an exhausted-stream error.
    #[must_use]
    pub fn exhausted(input: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::Exhausted {
            input: input.into(),
            expected: expected.into(),
        }
    }
}

/// Errors reported by a document store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// No run with this uid is known.
    #[error("Run not found: {uid}")]
    RunNotFound {
        /// The start uid that was requested.
        uid: String,
    },

    /// An event references a datum the store cannot resolve.
    #[error("Datum not found: {datum_id}")]
    DatumNotFound {
        /// The unresolved datum id.
        datum_id: String,
    },

    /// The backing store failed.
    #[error("Broker backend error: {0}")]
    Backend(String),
}

/// Errors raised by numerical kernels and event field access.
///
/// Inside a stage these become the `reason` of a failure stop document.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum KernelError {
    /// An event does not carry the requested field.
    #[error("KeyError('{field}')")]
    MissingField {
        /// The missing field name.
        field: String,
    },

    /// A field holds a value of the wrong type.
    #[error("TypeError: field '{field}' is not {expected}")]
    WrongType {
        /// The field name.
        field: String,
        /// The type the kernel needed.
        expected: &'static str,
    },

    /// Two arrays that must match do not.
    #[error("ValueError: shape mismatch, expected {expected:?}, got {found:?}")]
    ShapeMismatch {
        /// The shape the kernel needed.
        expected: Vec<usize>,
        /// The shape it received.
        found: Vec<usize>,
    },

    /// An event index past the end of an auxiliary run.
    #[error("IndexError: event index {index} out of range for run with {len} events")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// Number of events available.
        len: usize,
    },

    /// Calibration parameters are missing or inconsistent.
    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),

    /// A stored mask cannot be decoded.
    #[error("ValueError: invalid mask: {0}")]
    InvalidMask(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_info() {
        let err = ConfigError::unknown_mask_setting("bogus");
        assert_eq!(err.info.code, "CONFIG-MASK-SENTINEL");
        assert_eq!(err.info.context.get("value"), Some(&"bogus".to_string()));
        assert!(err.info.fix_hint.is_some());
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_stream_count_error() {
        let err = ConfigError::stream_count("dark_subtraction", 2, 1);
        assert_eq!(err.info.code, "CONFIG-STREAM-COUNT");
        assert!(err.to_string().contains("expects 2"));
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::unexpected("image", "event or stop", DocKind::Start);
        assert_eq!(
            err.to_string(),
            "Expected event or stop document from 'image', got 'start'"
        );
    }

    #[test]
    fn test_kernel_error_reads_like_python_repr() {
        let err = KernelError::IndexOutOfRange { index: 3, len: 1 };
        assert!(err.to_string().starts_with("IndexError"));
        let err = KernelError::MissingField { field: "img".into() };
        assert_eq!(err.to_string(), "KeyError('img')");
    }

    #[test]
    fn test_umbrella_conversion() {
        let err: RedflowError = ConfigError::new("bad").into();
        assert!(matches!(err, RedflowError::Config(_)));
    }
}
