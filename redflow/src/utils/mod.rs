//! Helpers for document uids and document timestamps.

pub mod timestamps;
mod uuid_utils;

pub use timestamps::{epoch_seconds, from_epoch_seconds, human_timestamp, Timestamp};
pub use uuid_utils::generate_uid;
