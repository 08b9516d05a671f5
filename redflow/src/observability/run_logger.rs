//! One log line per finished run.

use tracing::{debug, info, warn};

use crate::core::{DocStream, Document, ExitStatus};
use crate::utils::human_timestamp;

/// Watches a document stream and reports how each run ended.
///
/// Failed runs are logged as `run <uid> failed: <reason>`, the line
/// operators see in place of the missing data.
#[derive(Debug, Default, Clone)]
pub struct RunLogger {
    label: String,
    run_start: Option<String>,
    events: u64,
    failed: usize,
}

impl RunLogger {
    /// Creates a logger; `label` names the stream in every line.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    /// Feeds one document.
    pub fn observe(&mut self, doc: &Document) {
        match doc {
            Document::Start(start) => {
                self.run_start = Some(start.uid.clone());
                self.events = 0;
                debug!(stream = %self.label, started = %human_timestamp(start.time), "run {} opened", start.uid);
            }
            Document::Event(_) => self.events += 1,
            Document::Descriptor(_) => {}
            Document::Stop(stop) => {
                let uid = self.run_start.as_deref().unwrap_or(&stop.run_start);
                match stop.exit_status {
                    ExitStatus::Success => {
                        info!(stream = %self.label, events = self.events, "run {uid} finished");
                    }
                    ExitStatus::Failure => {
                        self.failed += 1;
                        let reason = stop.reason.as_deref().unwrap_or("unknown reason");
                        warn!(stream = %self.label, events = self.events, "run {uid} failed: {reason}");
                    }
                }
            }
        }
    }

    /// Number of failed runs seen.
    #[must_use]
    pub const fn failed(&self) -> usize {
        self.failed
    }

    /// Wraps `stream` so every document passes through a logger.
    pub fn wrap(mut self, stream: DocStream) -> DocStream {
        Box::new(stream.inspect(move |doc| self.observe(doc)))
    }
}
