//! Testing utilities for redflow pipelines.
//!
//! This module provides:
//! - Synthetic run builders and broker seeding
//! - Assertions on stage output runs
//! - Recording doubles for geometry construction

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_failure, assert_parents, assert_protocol, assert_success};
pub use fixtures::{calibration_run, seed_broker, Run, RunBuilder};
pub use mocks::CountingFactory;
