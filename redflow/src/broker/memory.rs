//! A broker backed by in-memory document lists.

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use super::{Broker, Criteria, Header};
use crate::core::{doc_stream, DataValue, DocStream, Document, EventDoc};
use crate::errors::BrokerError;

#[derive(Debug, Default)]
struct Store {
    /// Runs in insertion order.
    runs: Vec<Vec<Document>>,
    datums: HashMap<String, DataValue>,
}

/// Keeps whole runs and a datum registry in memory.
///
/// Useful for tests and for replaying runs loaded from JSON.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    store: RwLock<Store>,
}

impl InMemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a run. The first document must be its start.
    ///
    /// Returns the run's start uid.
    pub fn insert_run(&self, documents: Vec<Document>) -> Result<String, BrokerError> {
        let uid = match documents.first() {
            Some(Document::Start(start)) => start.uid.clone(),
            _ => return Err(BrokerError::Backend("run must begin with a start document".to_string())),
        };
        debug!(run_start = %uid, documents = documents.len(), "run stored");
        self.store.write().runs.push(documents);
        Ok(uid)
    }

    /// Stores every document of a stream as one run.
    pub fn insert_stream(&self, stream: DocStream) -> Result<String, BrokerError> {
        self.insert_run(stream.collect())
    }

    /// Registers the value behind a datum reference.
    pub fn insert_datum(&self, datum_id: impl Into<String>, value: DataValue) {
        self.store.write().datums.insert(datum_id.into(), value);
    }

    /// Number of stored runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.read().runs.len()
    }

    /// True if no run is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.read().runs.is_empty()
    }

    fn fill_with(datums: &HashMap<String, DataValue>, event: &mut EventDoc) -> Result<(), BrokerError> {
        for value in event.data.values_mut() {
            if let DataValue::Datum { datum_id } = value {
                let resolved = datums
                    .get(datum_id.as_str())
                    .cloned()
                    .ok_or_else(|| BrokerError::DatumNotFound {
                        datum_id: datum_id.clone(),
                    })?;
                *value = resolved;
            }
        }
        Ok(())
    }
}

fn header_of(run: &[Document]) -> Option<Header> {
    let start = run.first()?.as_start()?.clone();
    let stop = run.last().and_then(Document::as_stop).cloned();
    Some(Header { start, stop })
}

impl Broker for InMemoryBroker {
    fn query(&self, criteria: &Criteria) -> Result<Vec<Header>, BrokerError> {
        let store = self.store.read();
        let mut found: Vec<Header> = store
            .runs
            .iter()
            .rev()
            .filter_map(|run| header_of(run))
            .filter(|h| criteria.matches(&h.start))
            .collect();
        // newest first; the reversed insertion order breaks ties
        found.sort_by(|a, b| b.time().total_cmp(&a.time()));
        debug!(%criteria, hits = found.len(), "broker query");
        Ok(found)
    }

    fn restream(&self, header: &Header, fill: bool) -> Result<DocStream, BrokerError> {
        let store = self.store.read();
        let run = store
            .runs
            .iter()
            .find(|run| run.first().map(Document::uid) == Some(header.uid()))
            .ok_or_else(|| BrokerError::RunNotFound {
                uid: header.uid().to_string(),
            })?;
        let mut documents = run.clone();
        if fill {
            for doc in &mut documents {
                if let Document::Event(event) = doc {
                    Self::fill_with(&store.datums, event)?;
                }
            }
        }
        Ok(doc_stream(documents))
    }

    fn fill_event(&self, event: &mut EventDoc) -> Result<(), BrokerError> {
        Self::fill_with(&self.store.read().datums, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;
    use crate::testing::RunBuilder;
    use ndarray::Array2;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_query_newest_first() {
        let broker = InMemoryBroker::new();
        let old = RunBuilder::new().time(100.0).metadata("is_dark", json!(true)).build();
        let new = RunBuilder::new().time(200.0).metadata("is_dark", json!(true)).build();
        let other = RunBuilder::new().time(300.0).build();
        for run in [&old, &new, &other] {
            broker.insert_run(run.documents()).unwrap();
        }
        let hits = broker.query(&Criteria::new().with_eq("is_dark", true)).unwrap();
        let uids: Vec<_> = hits.iter().map(Header::uid).collect();
        assert_eq!(uids, vec![new.start_uid(), old.start_uid()]);
        assert!(hits[0].stop.is_some());
        assert_eq!(broker.len(), 3);
    }

    #[test]
    fn test_restream_replays_documents() {
        let broker = InMemoryBroker::new();
        let run = RunBuilder::new().scalar_events("x", &[1.0, 2.0]).build();
        broker.insert_run(run.documents()).unwrap();
        let header = broker.query(&Criteria::uid(run.start_uid())).unwrap().remove(0);
        let replayed: Vec<_> = broker.restream(&header, false).unwrap().collect();
        assert_eq!(replayed, run.documents());
    }

    #[test]
    fn test_fill_resolves_datums() {
        let broker = InMemoryBroker::new();
        let run = RunBuilder::new().datum_events("pe1_image", &["d0", "d1"], (2, 2)).build();
        broker.insert_run(run.documents()).unwrap();
        broker.insert_datum("d0", DataValue::image(Array2::zeros((2, 2))));
        broker.insert_datum("d1", DataValue::image(Array2::ones((2, 2))));
        let header = broker.query(&Criteria::uid(run.start_uid())).unwrap().remove(0);

        let raw: Vec<_> = broker.restream(&header, false).unwrap().collect();
        assert!(raw[2].as_event().unwrap().needs_fill());

        let filled: Vec<_> = broker.restream(&header, true).unwrap().collect();
        let ev = filled[3].as_event().unwrap();
        assert!(!ev.needs_fill());
        assert_eq!(ev.data["pe1_image"].as_image().unwrap()[(1, 1)], 1.0);
    }

    #[test]
    fn test_missing_datum_and_run() {
        let broker = InMemoryBroker::new();
        let run = RunBuilder::new().datum_events("pe1_image", &["nope"], (2, 2)).build();
        broker.insert_run(run.documents()).unwrap();
        let header = broker.query(&Criteria::new()).unwrap().remove(0);
        let err = broker.restream(&header, true).err().unwrap();
        assert_eq!(err, BrokerError::DatumNotFound { datum_id: "nope".into() });

        let stranger = RunBuilder::new().build();
        let err = broker.restream(&Header::new(stranger.start().clone()), false).err().unwrap();
        assert!(matches!(err, BrokerError::RunNotFound { .. }));
    }

    #[test]
    fn test_insert_requires_start() {
        let broker = InMemoryBroker::new();
        let docs = RunBuilder::new().build().documents();
        assert!(broker.insert_run(docs[1..].to_vec()).is_err());
        assert!(broker.is_empty());
    }

    #[test]
    fn test_mock_broker_records_queries() {
        let mut mock = MockBroker::new();
        mock.expect_query()
            .withf(|c: &Criteria| c.iter().any(|(k, _)| k == "dark_collection_uid"))
            .times(1)
            .returning(|_| Ok(Vec::new()));
        let hits = mock.query(&Criteria::new().with_eq("dark_collection_uid", "abc")).unwrap();
        assert!(hits.is_empty());
    }
}
