//! Document kind and run exit status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The four kinds of document in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocKind {
    /// Opens a run and carries its metadata and provenance.
    Start,
    /// Declares the schema of the events that follow.
    Descriptor,
    /// One row of data.
    Event,
    /// Closes a run with its exit status.
    Stop,
}

impl DocKind {
    /// Returns the wire name of the kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Descriptor => "descriptor",
            Self::Event => "event",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for DocKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Every input event was processed.
    #[default]
    Success,
    /// Processing stopped early; see `reason` and `traceback`.
    Failure,
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

impl ExitStatus {
    /// Returns true if the run succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_kind_display() {
        assert_eq!(DocKind::Start.to_string(), "start");
        assert_eq!(DocKind::Descriptor.to_string(), "descriptor");
        assert_eq!(DocKind::Event.to_string(), "event");
        assert_eq!(DocKind::Stop.to_string(), "stop");
    }

    #[test]
    fn test_exit_status_serialize() {
        let json = serde_json::to_string(&ExitStatus::Failure).unwrap();
        assert_eq!(json, r#""failure""#);

        let status: ExitStatus = serde_json::from_str(r#""success""#).unwrap();
        assert!(status.is_success());
    }
}
