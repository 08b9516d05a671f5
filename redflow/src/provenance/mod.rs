//! Run accounting shared by every stage.
//!
//! A stage never builds documents by hand: it describes how it was invoked
//! with a [`Provenance`] record and lets a [`RunBookkeeper`] mint uids,
//! timestamps and parent links for its output run.

mod bookkeeping;
mod record;

pub use bookkeeping::{Failure, RunBookkeeper};
pub use record::Provenance;
