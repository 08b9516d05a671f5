//! Composition of stages into full reductions.
//!
//! This module provides:
//! - The composer configuration and mask settings
//! - Dark, calibration and background lookup in the broker
//! - A geometry cache invalidated when the calibration changes
//! - The per-run composer and a concurrent batch driver

mod batch;
mod cache;
mod composer;
mod config;
mod resolve;

pub use batch::{reduce_headers, RunSummary};
pub use cache::CachedGeometryFactory;
pub use composer::{CalibrationSource, PipelineInputs, Reduction, ReductionPipeline};
pub use config::{MaskSetting, PipelineConfig};
pub use resolve::{query_background, query_calibration, query_dark, select_header};
