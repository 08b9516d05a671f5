//! # Redflow
//!
//! Streaming, provenance-tracked reduction of diffraction image runs.
//!
//! A run is a stream of documents: one `start`, a `descriptor`, any number
//! of `event`s and one `stop`. Redflow provides:
//!
//! - **Stream combinators**: tee, zip, zip-latest, peek-and-replay, unique
//! - **Stages**: dark and background subtraction, polarization correction,
//!   masking, azimuthal integration and calibration spoofing, each turning
//!   input runs into a derived run whose start records its parents and
//!   processing parameters
//! - **Failure containment**: errors inside a stage end its run with a
//!   `failure` stop document instead of escaping to the caller
//! - **Composition**: a pipeline that finds darks, backgrounds and
//!   calibrations in a broker and assembles the full reduction
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use redflow::prelude::*;
//!
//! let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
//! let mut pipeline = ReductionPipeline::new(PipelineConfig::default(), broker.clone())?;
//! let header = broker.query(&Criteria::new().with_eq("sample_name", "Ni"))?.remove(0);
//! let reduction = pipeline.reduce(broker.restream(&header, true)?, PipelineInputs::default())?;
//! for doc in reduction {
//!     println!("{}", doc.name());
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod broker;
pub mod core;
pub mod errors;
pub mod kernels;
pub mod observability;
pub mod pipeline;
pub mod provenance;
pub mod stages;
pub mod streams;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::broker::{Broker, Criteria, Header, InMemoryBroker};
    pub use crate::core::{
        doc_stream, DataKey, DataValue, DescriptorDoc, DocKind, DocStream, Document, EventDoc, ExitStatus, StartDoc,
        StopDoc,
    };
    pub use crate::errors::{BrokerError, ConfigError, KernelError, ProtocolError, RedflowError};
    pub use crate::kernels::{Calibration, Geometry, GeometryFactory};
    pub use crate::observability::{init_logging, RunLogger};
    pub use crate::pipeline::{
        reduce_headers, MaskSetting, PipelineConfig, PipelineInputs, Reduction, ReductionPipeline, RunSummary,
    };
    pub use crate::provenance::Provenance;
    pub use crate::stages::{
        auto_mask, background_subtraction, dark_subtraction, integrate, margin_mask, polarization_correction, spoof,
        static_mask, MaskInput, StageKernel, StageMachine,
    };
    pub use crate::streams::{peek, tee, unique, zip, zip_latest};
    pub use std::sync::Arc;
}
