//! Document model shared by every stage.
//!
//! This module contains the vocabulary all stages obey:
//! - Document kinds and exit statuses
//! - The four document shapes and the `(name, doc)` stream item
//! - Event data values

mod document;
mod status;
mod value;

pub use document::{
    doc_stream, DataKey, DescriptorDoc, DocStream, Document, EventDoc, Metadata, StartDoc, StopDoc,
};
pub use status::{DocKind, ExitStatus};
pub use value::DataValue;
