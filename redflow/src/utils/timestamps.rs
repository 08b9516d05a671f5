//! Document time helpers.
//!
//! Documents carry `time` as floating point seconds since the Unix epoch.

use chrono::{DateTime, TimeZone, Utc};

/// A UTC point in time.
pub type Timestamp = DateTime<Utc>;

/// Returns the current time as seconds since the epoch.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn epoch_seconds() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6
}

/// Converts document time into a UTC timestamp.
///
/// Returns `None` for values outside chrono's representable range.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn from_epoch_seconds(seconds: f64) -> Option<Timestamp> {
    if !seconds.is_finite() {
        return None;
    }
    let secs = seconds.floor();
    let nanos = ((seconds - secs) * 1e9).round().min(999_999_999.0) as u32;
    Utc.timestamp_opt(secs as i64, nanos).single()
}

/// Formats document time as a compact `YYYYmmdd-HHMMSS` string for run labels.
#[must_use]
pub fn human_timestamp(seconds: f64) -> String {
    from_epoch_seconds(seconds).map_or_else(
        || seconds.to_string(),
        |dt| dt.format("%Y%m%d-%H%M%S").to_string(),
    )
}
