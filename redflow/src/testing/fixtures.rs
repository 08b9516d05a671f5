//! Synthetic runs for tests and examples.

use ndarray::Array2;
use std::collections::BTreeMap;

use crate::broker::InMemoryBroker;
use crate::core::{doc_stream, DataKey, DataValue, DescriptorDoc, DocStream, Document, EventDoc, ExitStatus, Metadata, StartDoc, StopDoc};
use crate::errors::BrokerError;
use crate::kernels::Calibration;
use crate::stages::{CALIBRATION_FIELD, MASK_FIELD};
use crate::utils::generate_uid;

#[derive(Debug, Clone)]
struct Column {
    field: String,
    key: DataKey,
    values: Vec<DataValue>,
}

/// Builds a complete, well-formed run.
///
/// Each `*_events` call adds one field; the run has as many events as the
/// shortest field.
#[derive(Debug, Clone, Default)]
pub struct RunBuilder {
    metadata: Metadata,
    time: Option<f64>,
    columns: Vec<Column>,
    shapes: bool,
}

impl RunBuilder {
    /// An empty run: start, descriptor, stop.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shapes: true,
            ..Self::default()
        }
    }

    /// Adds a start document metadata entry.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Sets the start time.
    #[must_use]
    pub const fn time(mut self, time: f64) -> Self {
        self.time = Some(time);
        self
    }

    fn column(mut self, field: impl Into<String>, key: DataKey, values: Vec<DataValue>) -> Self {
        self.columns.push(Column {
            field: field.into(),
            key,
            values,
        });
        self
    }

    /// Adds a numeric field.
    #[must_use]
    pub fn scalar_events(self, field: impl Into<String>, values: &[f64]) -> Self {
        let values = values.iter().copied().map(DataValue::Float).collect();
        self.column(field, DataKey::new("number", "synthetic"), values)
    }

    /// Adds an image field.
    #[must_use]
    pub fn image_events(self, field: impl Into<String>, images: Vec<Array2<f64>>) -> Self {
        let shape = images.first().map(|i| i.shape().to_vec());
        let values = images.into_iter().map(DataValue::image).collect();
        self.column(field, DataKey::array("synthetic", shape), values)
    }

    /// Adds a `mask` field.
    #[must_use]
    pub fn mask_events(self, masks: Vec<Array2<bool>>) -> Self {
        let shape = masks.first().map(|m| m.shape().to_vec());
        let values = masks.into_iter().map(DataValue::mask).collect();
        self.column(MASK_FIELD, DataKey::array("synthetic", shape), values)
    }

    /// Adds a `mask` field holding `null` in `n` events.
    #[must_use]
    pub fn null_mask_events(self, n: usize) -> Self {
        self.column(MASK_FIELD, DataKey::array("synthetic", None), vec![DataValue::Null; n])
    }

    /// Adds a structured field.
    #[must_use]
    pub fn json_events(self, field: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        let values = values.into_iter().map(DataValue::Json).collect();
        self.column(field, DataKey::new("object", "synthetic"), values)
    }

    /// Adds an externally stored image field whose events hold datum ids.
    #[must_use]
    pub fn datum_events(self, field: impl Into<String>, datum_ids: &[&str], shape: (usize, usize)) -> Self {
        let values = datum_ids.iter().map(|id| DataValue::datum(*id)).collect();
        let key = DataKey::array("synthetic", Some(vec![shape.0, shape.1])).with_external("FILESTORE:");
        self.column(field, key, values)
    }

    /// Leaves `shape` out of every data key.
    #[must_use]
    pub fn without_shapes(mut self) -> Self {
        self.shapes = false;
        self
    }

    /// Mints the run's documents.
    #[must_use]
    pub fn build(self) -> Run {
        let mut start = StartDoc::new(self.metadata);
        if let Some(time) = self.time {
            start.time = time;
        }
        let data_keys = self
            .columns
            .iter()
            .map(|c| {
                let mut key = c.key.clone();
                if !self.shapes {
                    key.shape = None;
                }
                (c.field.clone(), key)
            })
            .collect();
        let descriptor = DescriptorDoc {
            uid: generate_uid(),
            time: start.time,
            run_start: start.uid.clone(),
            name: Some("primary".to_string()),
            data_keys,
        };
        let count = self.columns.iter().map(|c| c.values.len()).min().unwrap_or(0);
        let events: Vec<Document> = (0..count)
            .map(|i| {
                let data: BTreeMap<_, _> = self
                    .columns
                    .iter()
                    .map(|c| (c.field.clone(), c.values[i].clone()))
                    .collect();
                #[allow(clippy::cast_precision_loss)]
                let time = start.time + i as f64;
                Document::Event(EventDoc {
                    uid: generate_uid(),
                    time,
                    descriptor: descriptor.uid.clone(),
                    seq_num: i as u64,
                    timestamps: data.keys().map(|k| (k.clone(), time)).collect(),
                    data,
                })
            })
            .collect();
        let stop = StopDoc {
            uid: generate_uid(),
            time: start.time + 1.0,
            run_start: start.uid.clone(),
            exit_status: ExitStatus::Success,
            reason: None,
            traceback: None,
        };
        let mut documents = vec![Document::Start(start), Document::Descriptor(descriptor)];
        documents.extend(events);
        documents.push(Document::Stop(stop));
        Run { documents }
    }
}

/// The documents of one synthetic run.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    documents: Vec<Document>,
}

impl Run {
    /// A fresh stream over the run.
    #[must_use]
    pub fn stream(&self) -> DocStream {
        doc_stream(self.documents.clone())
    }

    /// All documents, in order.
    #[must_use]
    pub fn documents(&self) -> Vec<Document> {
        self.documents.clone()
    }

    /// The start document.
    #[must_use]
    pub fn start(&self) -> &StartDoc {
        match &self.documents[0] {
            Document::Start(start) => start,
            _ => unreachable!("runs begin with a start document"),
        }
    }

    /// Uid of the start document.
    #[must_use]
    pub fn start_uid(&self) -> &str {
        &self.start().uid
    }
}

/// A one-event calibration run, as produced by a calibration spoof.
#[must_use]
pub fn calibration_run(calibration: &Calibration) -> Run {
    RunBuilder::new()
        .json_events(CALIBRATION_FIELD, vec![calibration.to_json()])
        .build()
}

/// Stores `runs` in a new in-memory broker.
pub fn seed_broker<'a, I>(runs: I) -> Result<InMemoryBroker, BrokerError>
where
    I: IntoIterator<Item = &'a Run>,
{
    let broker = InMemoryBroker::new();
    for run in runs {
        broker.insert_run(run.documents())?;
    }
    Ok(broker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_protocol, assert_success};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builder_emits_valid_run() {
        let run = RunBuilder::new()
            .metadata("sample_name", serde_json::json!("Ni"))
            .scalar_events("x", &[1.0, 2.0])
            .image_events("img", vec![Array2::zeros((2, 3)); 3])
            .build();
        let docs = run.documents();
        assert_protocol(&docs);
        assert_success(&docs);
        assert_eq!(docs.len(), 5);
        assert_eq!(run.start().get_str("sample_name"), Some("Ni"));
        assert_eq!(docs[1].as_descriptor().unwrap().shape_of("img"), Some(vec![2, 3]));
    }

    #[test]
    fn test_without_shapes() {
        let run = RunBuilder::new()
            .image_events("img", vec![Array2::zeros((2, 2))])
            .without_shapes()
            .build();
        assert_eq!(run.documents()[1].as_descriptor().unwrap().shape_of("img"), None);
    }

    #[test]
    fn test_seed_broker() {
        let a = RunBuilder::new().build();
        let b = RunBuilder::new().build();
        let broker = seed_broker([&a, &b]).unwrap();
        assert_eq!(broker.len(), 2);
    }
}
