//! Logging setup and run lifecycle reporting.

mod logging;
mod run_logger;

pub use logging::{init_logging, LOG_ENV};
pub use run_logger::RunLogger;
