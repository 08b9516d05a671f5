//! One input stream of a stage, read under the document protocol.

use crate::core::{DescriptorDoc, DocStream, Document, EventDoc, StartDoc};
use crate::errors::{KernelError, ProtocolError};
use crate::streams::peek_n;

/// How an input's events relate to the primary stream after a look-ahead.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookahead {
    /// The run holds exactly one event.
    Single(EventDoc),
    /// The run holds no events.
    Empty,
    /// The run holds several events; nothing was consumed.
    Many,
}

/// A named input stream together with the documents read from it so far.
pub struct StageInput {
    name: String,
    stream: Option<DocStream>,
    start: Option<StartDoc>,
    descriptor: Option<DescriptorDoc>,
    /// Events read ahead by [`StageInput::event_at`].
    events: Vec<EventDoc>,
    latest: Option<EventDoc>,
    finished: bool,
}

impl std::fmt::Debug for StageInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageInput")
            .field("name", &self.name)
            .field("released", &self.stream.is_none())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl StageInput {
    /// Wraps a stream under `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, stream: DocStream) -> Self {
        Self {
            name: name.into(),
            stream: Some(stream),
            start: None,
            descriptor: None,
            events: Vec::new(),
            latest: None,
            finished: false,
        }
    }

    /// Input name used in errors and provenance.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The start document, once read.
    #[must_use]
    pub const fn start(&self) -> Option<&StartDoc> {
        self.start.as_ref()
    }

    /// The descriptor, once read.
    #[must_use]
    pub const fn descriptor(&self) -> Option<&DescriptorDoc> {
        self.descriptor.as_ref()
    }

    /// Shape the descriptor declares for `field`, if any.
    #[must_use]
    pub fn shape_of(&self, field: &str) -> Option<Vec<usize>> {
        self.descriptor.as_ref().and_then(|d| d.shape_of(field))
    }

    fn pull(&mut self, expected: &str) -> Result<Document, ProtocolError> {
        self.stream
            .as_mut()
            .and_then(Iterator::next)
            .ok_or_else(|| ProtocolError::exhausted(&self.name, expected))
    }

    /// Reads the start document.
    pub fn read_start(&mut self) -> Result<&StartDoc, ProtocolError> {
        match self.pull("start")? {
            Document::Start(doc) => Ok(self.start.insert(doc)),
            other => Err(ProtocolError::unexpected(&self.name, "start", other.kind())),
        }
    }

    /// Reads the descriptor that follows the start document.
    pub fn read_descriptor(&mut self) -> Result<&DescriptorDoc, ProtocolError> {
        match self.pull("descriptor")? {
            Document::Descriptor(doc) => Ok(self.descriptor.insert(doc)),
            other => Err(ProtocolError::unexpected(&self.name, "descriptor", other.kind())),
        }
    }

    /// Reads the next event. `Ok(None)` means the run's stop was reached.
    ///
    /// Anything other than an event or a stop is a protocol violation.
    pub fn next_event(&mut self) -> Result<Option<EventDoc>, ProtocolError> {
        if self.finished {
            return Ok(None);
        }
        match self.pull("event or stop")? {
            Document::Event(ev) => Ok(Some(ev)),
            Document::Stop(_) => {
                self.finished = true;
                Ok(None)
            }
            other => Err(ProtocolError::unexpected(&self.name, "event or stop", other.kind())),
        }
    }

    /// Returns event `index` of the run, reading ahead as needed.
    pub fn event_at(&mut self, index: usize) -> anyhow::Result<&EventDoc> {
        while self.events.len() <= index {
            match self.next_event()? {
                Some(ev) => self.events.push(ev),
                None => {
                    return Err(KernelError::IndexOutOfRange {
                        index,
                        len: self.events.len(),
                    }
                    .into())
                }
            }
        }
        Ok(&self.events[index])
    }

    /// Advances by one event and returns the latest event seen.
    ///
    /// After the run ends the last event is held, so a short stream keeps
    /// supplying its final value.
    pub fn next_latest(&mut self) -> Result<Option<&EventDoc>, ProtocolError> {
        if let Some(ev) = self.next_event()? {
            self.latest = Some(ev);
        }
        Ok(self.latest.as_ref())
    }

    /// Looks two documents ahead to tell a single-event run from a live one.
    ///
    /// The documents are put back unless the run turned out to hold a single
    /// event, in which case the input is finished.
    pub fn lookahead(&mut self) -> Result<Lookahead, ProtocolError> {
        let Some(stream) = self.stream.take() else {
            return Err(ProtocolError::exhausted(&self.name, "event or stop"));
        };
        let (head, replay) = peek_n(stream, 2);
        self.stream = Some(Box::new(replay));
        match head.as_slice() {
            [Document::Event(ev), Document::Stop(_)] => {
                let ev = ev.clone();
                self.release();
                Ok(Lookahead::Single(ev))
            }
            [Document::Stop(_), ..] => {
                self.release();
                Ok(Lookahead::Empty)
            }
            [Document::Event(_), Document::Event(_)] => Ok(Lookahead::Many),
            [Document::Event(_)] | [] => Err(ProtocolError::exhausted(&self.name, "event or stop")),
            [Document::Event(_), other] | [other, ..] => Err(ProtocolError::unexpected(
                &self.name,
                "event or stop",
                other.kind(),
            )),
        }
    }

    /// Drops the underlying stream, releasing any shared buffer it holds.
    pub fn release(&mut self) {
        self.stream = None;
        self.finished = true;
    }

    /// True once the stream has been dropped or its stop read.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }
}
