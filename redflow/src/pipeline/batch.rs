//! Reducing many runs at once.
//!
//! Each run gets its own [`ReductionPipeline`] on a blocking worker; nothing
//! is shared between runs except the read-only broker.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::{PipelineConfig, PipelineInputs, ReductionPipeline};
use crate::broker::{Broker, Header};
use crate::core::{Document, ExitStatus};
use crate::errors::{ProtocolError, RedflowError};

/// How one reduced run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Start uid of the raw run.
    pub raw_uid: String,
    /// Start uid of the integrated output run.
    pub start_uid: String,
    /// Exit status of the output run.
    pub exit_status: ExitStatus,
    /// Failure reason, if any.
    pub reason: Option<String>,
    /// Number of output events.
    pub events: usize,
}

impl RunSummary {
    /// Drains an output run into its summary.
    pub fn from_run<I>(raw_uid: impl Into<String>, docs: I) -> Result<Self, ProtocolError>
    where
        I: IntoIterator<Item = Document>,
    {
        let mut start_uid = None;
        let mut events = 0;
        for doc in docs {
            match doc {
                Document::Start(start) => start_uid = Some(start.uid),
                Document::Event(_) => events += 1,
                Document::Descriptor(_) => {}
                Document::Stop(stop) => {
                    return Ok(Self {
                        raw_uid: raw_uid.into(),
                        start_uid: start_uid.unwrap_or(stop.run_start),
                        exit_status: stop.exit_status,
                        reason: stop.reason,
                        events,
                    });
                }
            }
        }
        Err(ProtocolError::exhausted("integration", "stop"))
    }
}

fn reduce_one(broker: Arc<dyn Broker>, config: PipelineConfig, header: &Header) -> Result<RunSummary, RedflowError> {
    let raw = broker.restream(header, true)?;
    let mut pipeline = ReductionPipeline::new(config, broker)?;
    let reduction = pipeline.reduce(raw, PipelineInputs::default())?;
    Ok(RunSummary::from_run(header.uid(), reduction)?)
}

/// Reduces every header concurrently, at most `parallelism` at a time.
///
/// Results come back in the order of `headers`.
pub async fn reduce_headers(
    broker: Arc<dyn Broker>,
    config: PipelineConfig,
    headers: Vec<Header>,
    parallelism: usize,
) -> Vec<Result<RunSummary, RedflowError>> {
    let parallelism = parallelism.max(1);
    let total = headers.len();
    let mut results: Vec<Option<Result<RunSummary, RedflowError>>> = (0..total).map(|_| None).collect();
    let mut pending = headers.into_iter().enumerate();
    let mut running = FuturesUnordered::new();

    let spawn = |index: usize, header: Header| {
        let broker = Arc::clone(&broker);
        let config = config.clone();
        async move {
            let handle = tokio::task::spawn_blocking(move || reduce_one(broker, config, &header));
            let result = handle.await.map_err(|e| RedflowError::Task(e.to_string())).and_then(|r| r);
            (index, result)
        }
    };

    for (index, header) in pending.by_ref().take(parallelism) {
        running.push(spawn(index, header));
    }
    while let Some((index, result)) = running.next().await {
        match &result {
            Ok(summary) if summary.exit_status.is_success() => {
                info!(raw = %summary.raw_uid, events = summary.events, "run reduced");
            }
            Ok(summary) => warn!(raw = %summary.raw_uid, reason = ?summary.reason, "run reduced with failure"),
            Err(e) => warn!(error = %e, "run could not be reduced"),
        }
        results[index] = Some(result);
        if let Some((index, header)) = pending.next() {
            running.push(spawn(index, header));
        }
    }

    results
        .into_iter()
        .map(|r| r.unwrap_or_else(|| Err(RedflowError::Task("run was never scheduled".to_string()))))
        .collect()
}
