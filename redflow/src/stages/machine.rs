//! The state machine every stage runs.
//!
//! ```text
//! AwaitingStart -> AwaitingDescriptor -> Streaming -> Done
//! ```
//!
//! Each call to `next()` advances exactly as far as needed to produce one
//! output document. Errors never escape: they end the run with a `failure`
//! stop document. Whatever happens, the output is one start, one
//! descriptor, zero or more events and one stop.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::StageInput;
use crate::core::{DataKey, DataValue, DescriptorDoc, Document, EventDoc, Metadata, StartDoc};
use crate::errors::ConfigError;
use crate::provenance::{Failure, Provenance, RunBookkeeper};

/// Output fields of one event.
pub type EventData = BTreeMap<String, DataValue>;

/// The per-stage part of a stage: what it reads up front and what it does to
/// each event.
///
/// The machine owns the protocol; a kernel only sees documents that have
/// already been checked.
pub trait StageKernel: Send + 'static {
    /// Stage name, recorded as `hfi` on the output start.
    fn name(&self) -> &'static str;

    /// Names of the streams the stage consumes, primary first.
    fn input_names(&self) -> Vec<String>;

    /// How the stage was invoked.
    fn provenance(&self) -> Provenance;

    /// Output fields declared when preparation fails.
    fn fallback_keys(&self) -> BTreeMap<String, DataKey>;

    /// Whether the stage maps every primary event or emits a single event.
    fn cadence(&self) -> Cadence {
        Cadence::PerEvent
    }

    /// Start uids of inputs consumed before the stage was built.
    fn extra_parents(&self) -> Vec<String> {
        Vec::new()
    }

    /// Reads auxiliary inputs and returns the output data keys.
    ///
    /// `primary` has had its start and descriptor read. `aux` holds every
    /// other input, in declaration order, likewise positioned.
    fn prepare(&mut self, primary: &StageInput, aux: &mut [StageInput]) -> anyhow::Result<BTreeMap<String, DataKey>>;

    /// Transforms one primary event.
    fn process(&mut self, event: &EventDoc, aux: &mut [StageInput]) -> anyhow::Result<EventData>;

    /// Produces the only event of a [`Cadence::Once`] stage.
    fn process_once(&mut self, _aux: &mut [StageInput]) -> anyhow::Result<EventData> {
        anyhow::bail!("stage '{}' does not emit a single event", self.name())
    }
}

/// How a stage walks its primary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cadence {
    /// One output event per primary event.
    #[default]
    PerEvent,
    /// Exactly one output event, `seq_num` 0; the primary events are never read.
    Once,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingStart,
    AwaitingDescriptor,
    Streaming,
    Done,
}

/// A running stage: an iterator of output documents.
pub struct StageMachine<K: StageKernel> {
    kernel: K,
    inputs: Vec<StageInput>,
    state: State,
    keeper: Option<RunBookkeeper>,
    failure: Option<Failure>,
    position: u64,
    emitted: u64,
}

impl<K: StageKernel> std::fmt::Debug for StageMachine<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageMachine")
            .field("stage", &self.kernel.name())
            .field("state", &self.state)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

impl<K: StageKernel> StageMachine<K> {
    /// Builds a stage over `streams`, which must match the kernel's inputs.
    pub fn new(kernel: K, streams: Vec<crate::core::DocStream>) -> Result<Self, ConfigError> {
        let names = kernel.input_names();
        if names.len() != streams.len() {
            return Err(ConfigError::stream_count(kernel.name(), names.len(), streams.len()));
        }
        let inputs = names.into_iter().zip(streams).map(|(n, s)| StageInput::new(n, s)).collect();
        Ok(Self {
            kernel,
            inputs,
            state: State::AwaitingStart,
            keeper: None,
            failure: None,
            position: 0,
            emitted: 0,
        })
    }

    /// The kernel driving this stage.
    pub const fn kernel(&self) -> &K {
        &self.kernel
    }

    fn fail(&mut self, err: impl Into<anyhow::Error>) {
        let err = err.into();
        if self.failure.is_none() {
            warn!(stage = self.kernel.name(), error = %err, "stage run failed");
            self.failure = Some(Failure::from(&err));
        }
    }

    fn emit_start(&mut self) -> StartDoc {
        let mut parents = Vec::with_capacity(self.inputs.len());
        let mut error = None;
        for input in &mut self.inputs {
            match input.read_start() {
                Ok(start) => parents.push(start.uid.clone()),
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = error {
            self.fail(e);
        }
        parents.extend(self.kernel.extra_parents());
        let provenance = self.kernel.provenance().with_inputs(self.kernel.input_names());
        let (keeper, start) = RunBookkeeper::open(parents, provenance, Metadata::new());
        info!(stage = self.kernel.name(), run_start = %start.uid, "stage run started");
        self.keeper = Some(keeper);
        start
    }

    fn emit_descriptor(&mut self) -> DescriptorDoc {
        let keys = if self.failure.is_some() {
            self.kernel.fallback_keys()
        } else {
            match self.prepare() {
                Ok(keys) => keys,
                Err(e) => {
                    self.fail(e);
                    self.kernel.fallback_keys()
                }
            }
        };
        self.keeper_mut().descriptor(keys)
    }

    fn prepare(&mut self) -> anyhow::Result<BTreeMap<String, DataKey>> {
        for input in &mut self.inputs {
            input.read_descriptor()?;
        }
        let (primary, aux) = self
            .inputs
            .split_first_mut()
            .ok_or_else(|| anyhow::anyhow!("stage has no inputs"))?;
        self.kernel.prepare(primary, aux)
    }

    fn keeper_mut(&mut self) -> &mut RunBookkeeper {
        self.keeper.get_or_insert_with(|| {
            RunBookkeeper::open(Vec::new(), Provenance::new("unknown", "unknown"), Metadata::new()).0
        })
    }

    /// Pulls the next primary event and transforms it. `None` ends the run.
    fn step(&mut self) -> Option<EventDoc> {
        let (primary, aux) = self.inputs.split_first_mut()?;
        let seq_num = self.position;
        let result = match self.kernel.cadence() {
            Cadence::Once if seq_num > 0 => return None,
            Cadence::Once => {
                primary.release();
                self.kernel.process_once(aux)
            }
            Cadence::PerEvent => match primary.next_event() {
                Ok(Some(event)) => self
                    .kernel
                    .process(&event, aux)
                    .map_err(|e| e.context(format!("processing event {seq_num}"))),
                Ok(None) => return None,
                Err(e) => {
                    self.fail(e);
                    return None;
                }
            },
        };
        self.position += 1;
        match result {
            Ok(data) => {
                debug!(stage = self.kernel.name(), seq_num, "event processed");
                self.emitted += 1;
                Some(self.keeper_mut().event(seq_num, data))
            }
            Err(e) => {
                self.fail(e);
                None
            }
        }
    }

    fn emit_stop(&mut self) -> Document {
        for input in &mut self.inputs {
            input.release();
        }
        let failure = self.failure.take();
        let stop = self.keeper_mut().stop(failure);
        info!(
            stage = self.kernel.name(),
            run_start = %stop.run_start,
            exit_status = %stop.exit_status,
            events = self.emitted,
            "stage run finished"
        );
        Document::Stop(stop)
    }
}

impl<K: StageKernel> Iterator for StageMachine<K> {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        match self.state {
            State::AwaitingStart => {
                self.state = State::AwaitingDescriptor;
                Some(Document::Start(self.emit_start()))
            }
            State::AwaitingDescriptor => {
                self.state = State::Streaming;
                Some(Document::Descriptor(self.emit_descriptor()))
            }
            State::Streaming => {
                if self.failure.is_none() {
                    if let Some(event) = self.step() {
                        return Some(Document::Event(event));
                    }
                }
                self.state = State::Done;
                Some(self.emit_stop())
            }
            State::Done => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{doc_stream, ExitStatus};
    use crate::testing::{assert_failure, assert_parents, assert_protocol, assert_success, RunBuilder};
    use pretty_assertions::assert_eq;

    /// Doubles `x`, failing on event `fail_at`.
    struct Doubler {
        fail_at: Option<u64>,
    }

    impl StageKernel for Doubler {
        fn name(&self) -> &'static str {
            "doubler"
        }

        fn input_names(&self) -> Vec<String> {
            vec!["numbers".to_string(), "other".to_string()]
        }

        fn provenance(&self) -> Provenance {
            Provenance::new(self.name(), "double")
        }

        fn fallback_keys(&self) -> BTreeMap<String, DataKey> {
            BTreeMap::from([("y".to_string(), DataKey::new("number", "test"))])
        }

        fn prepare(&mut self, _primary: &StageInput, _aux: &mut [StageInput]) -> anyhow::Result<BTreeMap<String, DataKey>> {
            Ok(self.fallback_keys())
        }

        fn process(&mut self, event: &EventDoc, _aux: &mut [StageInput]) -> anyhow::Result<EventData> {
            if Some(event.seq_num) == self.fail_at {
                anyhow::bail!("ValueError: cannot double event {}", event.seq_num);
            }
            let x = event.require("x")?.as_f64().unwrap_or_default();
            Ok(EventData::from([("y".to_string(), DataValue::Float(2.0 * x))]))
        }
    }

    fn run(fail_at: Option<u64>, primary: crate::core::DocStream) -> (Vec<Document>, String) {
        let other = RunBuilder::new().build();
        let docs = StageMachine::new(Doubler { fail_at }, vec![primary, other.stream()])
            .unwrap()
            .collect();
        (docs, other.start_uid().to_string())
    }

    #[test]
    fn test_success_protocol_and_parents() {
        let numbers = RunBuilder::new().scalar_events("x", &[1.0, 2.0, 3.0]).build();
        let (docs, other) = run(None, numbers.stream());
        assert_protocol(&docs);
        assert_parents(&docs, &[numbers.start_uid(), other.as_str()]);
        assert_success(&docs);
        let ys: Vec<_> = docs
            .iter()
            .filter_map(|d| d.as_event())
            .map(|ev| (ev.seq_num, ev.data["y"].as_f64().unwrap()))
            .collect();
        assert_eq!(ys, vec![(0, 2.0), (1, 4.0), (2, 6.0)]);
    }

    #[test]
    fn test_failure_keeps_earlier_events() {
        let numbers = RunBuilder::new().scalar_events("x", &[1.0, 2.0, 3.0, 4.0]).build();
        let (docs, _) = run(Some(2), numbers.stream());
        assert_protocol(&docs);
        assert_eq!(docs.iter().filter(|d| d.as_event().is_some()).count(), 2);
        let stop = assert_failure(&docs);
        let reason = stop.reason.as_deref().unwrap();
        assert!(reason.starts_with("processing event 2"));
        assert!(reason.contains("ValueError"));
        assert!(matches!(docs.last(), Some(Document::Stop(_))));
    }

    #[test]
    fn test_protocol_violation_becomes_failure() {
        let numbers = RunBuilder::new().scalar_events("x", &[1.0, 2.0]).build();
        let mut docs = numbers.documents();
        let stray = docs[0].clone();
        docs.insert(3, stray);
        let (out, _) = run(None, doc_stream(docs));
        assert_protocol(&out);
        assert_eq!(out.iter().filter(|d| d.as_event().is_some()).count(), 1);
        let stop = assert_failure(&out);
        assert!(stop.reason.as_deref().unwrap().contains("start"));
    }

    #[test]
    fn test_truncated_input_still_completes() {
        let numbers = RunBuilder::new().scalar_events("x", &[1.0]).build();
        let docs: Vec<_> = numbers.documents().into_iter().take(3).collect();
        let (out, _) = run(None, doc_stream(docs));
        assert_protocol(&out);
        assert_eq!(out.last().unwrap().as_stop().unwrap().exit_status, ExitStatus::Failure);
    }

    #[test]
    fn test_empty_input_fails_with_full_protocol() {
        let (out, _) = run(None, doc_stream(Vec::new()));
        assert_eq!(out.len(), 3);
        assert_protocol(&out);
        assert_failure(&out);
    }

    #[test]
    fn test_iterator_is_fused_after_stop() {
        let numbers = RunBuilder::new().scalar_events("x", &[1.0]).build();
        let other = RunBuilder::new().build();
        let mut stage = StageMachine::new(Doubler { fail_at: None }, vec![numbers.stream(), other.stream()]).unwrap();
        assert_eq!(stage.by_ref().count(), 4);
        assert!(stage.next().is_none());
    }
}
