//! Builds the start/descriptor/event/stop documents of one output run.

use std::collections::BTreeMap;

use super::Provenance;
use crate::core::{DataKey, DataValue, DescriptorDoc, EventDoc, ExitStatus, Metadata, StartDoc, StopDoc};
use crate::utils::{epoch_seconds, generate_uid};

/// Why a run ended early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// One-line rendering of the error.
    pub reason: String,
    /// Full error chain.
    pub traceback: String,
}

impl Failure {
    /// Creates a failure record.
    #[must_use]
    pub fn new(reason: impl Into<String>, traceback: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            traceback: traceback.into(),
        }
    }
}

impl From<&anyhow::Error> for Failure {
    fn from(err: &anyhow::Error) -> Self {
        Self {
            reason: format!("{err:#}"),
            traceback: format!("{err:?}"),
        }
    }
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        Self::from(&err)
    }
}

/// Mints the documents of a single derived run.
///
/// Holds the run start uid and the descriptor uid so that every document the
/// stage emits points back at the right parents.
#[derive(Debug, Clone)]
pub struct RunBookkeeper {
    run_start: String,
    descriptor: Option<String>,
}

impl RunBookkeeper {
    /// Opens a run, returning the bookkeeper and the start document to emit.
    #[must_use]
    pub fn open(parents: Vec<String>, provenance: Provenance, metadata: Metadata) -> (Self, StartDoc) {
        let start = StartDoc {
            uid: generate_uid(),
            time: epoch_seconds(),
            parents,
            hfi: Some(provenance.hfi.clone()),
            provenance: Some(provenance),
            metadata,
        };
        let keeper = Self {
            run_start: start.uid.clone(),
            descriptor: None,
        };
        (keeper, start)
    }

    /// Uid of the output start document.
    #[must_use]
    pub fn run_start(&self) -> &str {
        &self.run_start
    }

    /// Builds the run's descriptor. Later events reference it.
    pub fn descriptor(&mut self, data_keys: BTreeMap<String, DataKey>) -> DescriptorDoc {
        let doc = DescriptorDoc {
            uid: generate_uid(),
            time: epoch_seconds(),
            run_start: self.run_start.clone(),
            name: Some("primary".to_string()),
            data_keys,
        };
        self.descriptor = Some(doc.uid.clone());
        doc
    }

    /// Builds an event carrying `data`.
    #[must_use]
    pub fn event(&self, seq_num: u64, data: BTreeMap<String, DataValue>) -> EventDoc {
        let time = epoch_seconds();
        let timestamps = data.keys().map(|k| (k.clone(), time)).collect();
        EventDoc {
            uid: generate_uid(),
            time,
            descriptor: self.descriptor.clone().unwrap_or_default(),
            seq_num,
            data,
            timestamps,
        }
    }

    /// Builds the terminal stop document.
    #[must_use]
    pub fn stop(&self, failure: Option<Failure>) -> StopDoc {
        let (exit_status, reason, traceback) = match failure {
            None => (ExitStatus::Success, None, None),
            Some(f) => (ExitStatus::Failure, Some(f.reason), Some(f.traceback)),
        };
        StopDoc {
            uid: generate_uid(),
            time: epoch_seconds(),
            run_start: self.run_start.clone(),
            exit_status,
            reason,
            traceback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_documents_link_to_run() {
        let (mut keeper, start) = RunBookkeeper::open(
            vec!["a".into(), "b".into()],
            Provenance::new("dark_subtraction", "subtract"),
            Metadata::new(),
        );
        assert_eq!(start.parents, vec!["a", "b"]);
        assert_eq!(start.hfi.as_deref(), Some("dark_subtraction"));

        let desc = keeper.descriptor(BTreeMap::new());
        assert_eq!(desc.run_start, start.uid);

        let ev = keeper.event(3, BTreeMap::from([("img".to_string(), DataValue::Float(1.0))]));
        assert_eq!(ev.descriptor, desc.uid);
        assert_eq!(ev.seq_num, 3);
        assert!(ev.timestamps.contains_key("img"));

        let stop = keeper.stop(None);
        assert_eq!(stop.run_start, start.uid);
        assert!(stop.exit_status.is_success());
        assert!(stop.reason.is_none());
    }

    #[test]
    fn test_failure_from_error_chain() {
        let err = Err::<(), _>(anyhow::anyhow!("IndexError: out of range"))
            .context("selecting background")
            .unwrap_err();
        let failure = Failure::from(&err);
        assert!(failure.reason.contains("selecting background"));
        assert!(failure.reason.contains("IndexError"));
        assert!(failure.traceback.contains("Caused by"));

        let (keeper, _) = RunBookkeeper::open(vec![], Provenance::new("x", "y"), Metadata::new());
        let stop = keeper.stop(Some(failure));
        assert_eq!(stop.exit_status, ExitStatus::Failure);
        assert!(stop.reason.is_some());
        assert!(stop.traceback.is_some());
    }
}
