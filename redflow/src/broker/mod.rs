//! The document store the pipeline queries and replays runs from.
//!
//! The store is passed into the pipeline explicitly as an
//! `Arc<dyn Broker>`; nothing in the crate reaches for a global handle.

mod criteria;
mod memory;

pub use criteria::Criteria;
pub use memory::InMemoryBroker;

use crate::core::{DocStream, EventDoc, StartDoc, StopDoc};
use crate::errors::BrokerError;

/// A stored run, identified by its start document.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    /// The run's start document.
    pub start: StartDoc,
    /// The run's stop document, if the run has finished.
    pub stop: Option<StopDoc>,
}

impl Header {
    /// Wraps a start document.
    #[must_use]
    pub const fn new(start: StartDoc) -> Self {
        Self { start, stop: None }
    }

    /// Uid of the run.
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.start.uid
    }

    /// Start time of the run, seconds since the epoch.
    #[must_use]
    pub const fn time(&self) -> f64 {
        self.start.time
    }
}

/// Read access to stored runs.
#[cfg_attr(test, mockall::automock)]
pub trait Broker: Send + Sync {
    /// Finds runs whose start document matches `criteria`, newest first.
    fn query(&self, criteria: &Criteria) -> Result<Vec<Header>, BrokerError>;

    /// Replays a run's documents in order.
    ///
    /// With `fill` set, datum references in events are resolved into inline
    /// values before the stream is returned.
    fn restream(&self, header: &Header, fill: bool) -> Result<DocStream, BrokerError>;

    /// Resolves the datum references of one event in place.
    fn fill_event(&self, event: &mut EventDoc) -> Result<(), BrokerError>;
}
