//! The four document shapes and the `(name, doc)` stream item.
//!
//! A run is `start`, one or more `descriptor`s, zero or more `event`s and a
//! single `stop`. On the wire each item is a two element array
//! `["event", {...}]`.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

use super::{DataValue, DocKind, ExitStatus};
use crate::errors::KernelError;
use crate::provenance::Provenance;

/// Free-form run metadata (the non-reserved keys of a start document).
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A forward-only, single pass stream of documents.
pub type DocStream = Box<dyn Iterator<Item = Document> + Send>;

/// Boxes any iterator of documents into a [`DocStream`].
pub fn doc_stream<I>(iter: I) -> DocStream
where
    I: IntoIterator<Item = Document>,
    I::IntoIter: Send + 'static,
{
    Box::new(iter.into_iter())
}

/// Opens a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartDoc {
    /// Unique id of the run.
    pub uid: String,
    /// Creation time, seconds since the epoch.
    pub time: f64,
    /// Start uids of every input run this run was derived from, in input order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
    /// Name of the stage that produced this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hfi: Option<String>,
    /// How this run was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    /// Domain metadata (sample, calibration, dark uids, ...).
    #[serde(flatten)]
    pub metadata: Metadata,
}

impl StartDoc {
    /// Creates a start document for raw (non-derived) data.
    #[must_use]
    pub fn new(metadata: Metadata) -> Self {
        Self {
            uid: crate::utils::generate_uid(),
            time: crate::utils::epoch_seconds(),
            parents: Vec::new(),
            hfi: None,
            provenance: None,
            metadata,
        }
    }

    /// Looks up a metadata value by key, following dots into nested objects.
    ///
    /// `"calibration_md.dist"` reads `metadata["calibration_md"]["dist"]`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&serde_json::Value> {
        if let Some(v) = self.metadata.get(path) {
            return Some(v);
        }
        let mut parts = path.split('.');
        let mut current = self.metadata.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Looks up a string metadata value.
    #[must_use]
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(serde_json::Value::as_str)
    }
}

/// Describes one field of the events that follow a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataKey {
    /// Data type name (`array`, `number`, ...).
    pub dtype: String,
    /// Array shape, omitted when unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    /// Where the data came from.
    pub source: String,
    /// Set when the data is stored outside the event (e.g. `FILESTORE:`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<String>,
}

impl DataKey {
    /// Creates a data key with the given dtype and source.
    #[must_use]
    pub fn new(dtype: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            dtype: dtype.into(),
            shape: None,
            source: source.into(),
            external: None,
        }
    }

    /// An array key, `shape` propagated only when known.
    #[must_use]
    pub fn array(source: impl Into<String>, shape: Option<Vec<usize>>) -> Self {
        Self {
            shape,
            ..Self::new("array", source)
        }
    }

    /// Sets the shape.
    #[must_use]
    pub fn with_shape(mut self, shape: Vec<usize>) -> Self {
        self.shape = Some(shape);
        self
    }

    /// Marks the key as externally stored.
    #[must_use]
    pub fn with_external(mut self, external: impl Into<String>) -> Self {
        self.external = Some(external.into());
        self
    }
}

/// Declares the schema of the events that follow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorDoc {
    /// Unique id of the descriptor.
    pub uid: String,
    /// Creation time, seconds since the epoch.
    pub time: f64,
    /// Uid of the start document of this run.
    pub run_start: String,
    /// Event stream name (usually `primary`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Field name to field description.
    pub data_keys: BTreeMap<String, DataKey>,
}

impl DescriptorDoc {
    /// Returns the declared shape of `field`, if present.
    #[must_use]
    pub fn shape_of(&self, field: &str) -> Option<Vec<usize>> {
        self.data_keys.get(field).and_then(|k| k.shape.clone())
    }
}

/// One row of data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDoc {
    /// Unique id of the event.
    pub uid: String,
    /// Creation time, seconds since the epoch.
    pub time: f64,
    /// Uid of the descriptor this event conforms to.
    pub descriptor: String,
    /// Position of the event in its run.
    pub seq_num: u64,
    /// Field name to value.
    pub data: BTreeMap<String, DataValue>,
    /// Field name to acquisition timestamp.
    #[serde(default)]
    pub timestamps: BTreeMap<String, f64>,
}

impl EventDoc {
    /// Returns the value of `field`, if present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&DataValue> {
        self.data.get(field)
    }

    /// Returns the value of `field` or a `KeyError`-style kernel error.
    pub fn require(&self, field: &str) -> Result<&DataValue, KernelError> {
        self.data.get(field).ok_or_else(|| KernelError::MissingField {
            field: field.to_string(),
        })
    }

    /// Returns true if any value is still an unresolved datum reference.
    #[must_use]
    pub fn needs_fill(&self) -> bool {
        self.data.values().any(DataValue::is_datum)
    }
}

/// Closes a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopDoc {
    /// Unique id of the stop document.
    pub uid: String,
    /// Creation time, seconds since the epoch.
    pub time: f64,
    /// Uid of the start document of this run.
    pub run_start: String,
    /// Whether the run completed.
    pub exit_status: ExitStatus,
    /// Rendered error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Error context chain on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// A named document, one item of a [`DocStream`].
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    /// `("start", doc)`
    Start(StartDoc),
    /// `("descriptor", doc)`
    Descriptor(DescriptorDoc),
    /// `("event", doc)`
    Event(EventDoc),
    /// `("stop", doc)`
    Stop(StopDoc),
}

impl Document {
    /// Returns the document kind.
    #[must_use]
    pub const fn kind(&self) -> DocKind {
        match self {
            Self::Start(_) => DocKind::Start,
            Self::Descriptor(_) => DocKind::Descriptor,
            Self::Event(_) => DocKind::Event,
            Self::Stop(_) => DocKind::Stop,
        }
    }

    /// Returns the wire name of the document.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Returns the document uid.
    #[must_use]
    pub fn uid(&self) -> &str {
        match self {
            Self::Start(d) => &d.uid,
            Self::Descriptor(d) => &d.uid,
            Self::Event(d) => &d.uid,
            Self::Stop(d) => &d.uid,
        }
    }

    /// Returns the document creation time.
    #[must_use]
    pub const fn time(&self) -> f64 {
        match self {
            Self::Start(d) => d.time,
            Self::Descriptor(d) => d.time,
            Self::Event(d) => d.time,
            Self::Stop(d) => d.time,
        }
    }

    /// Returns the start document, if this is one.
    #[must_use]
    pub const fn as_start(&self) -> Option<&StartDoc> {
        match self {
            Self::Start(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the descriptor, if this is one.
    #[must_use]
    pub const fn as_descriptor(&self) -> Option<&DescriptorDoc> {
        match self {
            Self::Descriptor(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the event, if this is one.
    #[must_use]
    pub const fn as_event(&self) -> Option<&EventDoc> {
        match self {
            Self::Event(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the stop document, if this is one.
    #[must_use]
    pub const fn as_stop(&self) -> Option<&StopDoc> {
        match self {
            Self::Stop(d) => Some(d),
            _ => None,
        }
    }

    /// Converts into a `(name, json)` pair.
    pub fn to_pair(&self) -> Result<(&'static str, serde_json::Value), serde_json::Error> {
        let value = match self {
            Self::Start(d) => serde_json::to_value(d)?,
            Self::Descriptor(d) => serde_json::to_value(d)?,
            Self::Event(d) => serde_json::to_value(d)?,
            Self::Stop(d) => serde_json::to_value(d)?,
        };
        Ok((self.name(), value))
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Start(d) => (DocKind::Start, d).serialize(serializer),
            Self::Descriptor(d) => (DocKind::Descriptor, d).serialize(serializer),
            Self::Event(d) => (DocKind::Event, d).serialize(serializer),
            Self::Stop(d) => (DocKind::Stop, d).serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (kind, doc): (DocKind, serde_json::Value) = Deserialize::deserialize(deserializer)?;
        let parsed = match kind {
            DocKind::Start => serde_json::from_value(doc).map(Self::Start),
            DocKind::Descriptor => serde_json::from_value(doc).map(Self::Descriptor),
            DocKind::Event => serde_json::from_value(doc).map(Self::Event),
            DocKind::Stop => serde_json::from_value(doc).map(Self::Stop),
        };
        parsed.map_err(D::Error::custom)
    }
}
