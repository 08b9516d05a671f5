//! Finding the dark, calibration and background runs belonging to a raw run.

use tracing::{debug, warn};

use crate::broker::{Broker, Criteria, Header};
use crate::core::StartDoc;

/// Picks one header out of several candidates.
///
/// With `temporal_proximity` the candidate whose start time is closest to
/// `start` wins; otherwise the first (newest) one does.
pub fn select_header(mut candidates: Vec<Header>, start: &StartDoc, temporal_proximity: bool) -> Option<Header> {
    if candidates.is_empty() {
        return None;
    }
    if !temporal_proximity {
        return Some(candidates.swap_remove(0));
    }
    let best = candidates
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (a.time() - start.time).abs().total_cmp(&(b.time() - start.time).abs()))
        .map(|(i, _)| i)?;
    Some(candidates.swap_remove(best))
}

fn query_logged(broker: &dyn Broker, criteria: &Criteria, what: &str) -> Vec<Header> {
    match broker.query(criteria) {
        Ok(found) => {
            debug!(%criteria, hits = found.len(), "{what} query");
            found
        }
        Err(e) => {
            warn!(%criteria, error = %e, "{what} query failed");
            Vec::new()
        }
    }
}

/// Dark runs sharing the raw run's `dark_key` value.
pub fn query_dark(broker: &dyn Broker, start: &StartDoc, dark_key: &str) -> Vec<Header> {
    let Some(value) = start.get(dark_key) else {
        return Vec::new();
    };
    let criteria = Criteria::new().with_eq(dark_key, value.clone()).with_eq("is_dark", true);
    query_logged(broker, &criteria, "dark")
}

/// Stored calibration products for the raw run.
///
/// Only derived runs count, so the raw run itself never matches.
pub fn query_calibration(broker: &dyn Broker, start: &StartDoc, calibration_key: &str) -> Vec<Header> {
    let Some(value) = start.get(calibration_key) else {
        return Vec::new();
    };
    let criteria = Criteria::new().with_eq(calibration_key, value.clone());
    query_logged(broker, &criteria, "calibration")
        .into_iter()
        .filter(|h| h.start.hfi.is_some() && h.uid() != start.uid)
        .collect()
}

/// Non-dark runs of the background sample named by `background_key`.
pub fn query_background(broker: &dyn Broker, start: &StartDoc, background_key: &str) -> Vec<Header> {
    let Some(value) = start.get(background_key) else {
        return Vec::new();
    };
    let criteria = Criteria::new().with_eq("sample_uid", value.clone());
    query_logged(broker, &criteria, "background")
        .into_iter()
        .filter(|h| h.start.get("is_dark") != Some(&serde_json::Value::Bool(true)) && h.uid() != start.uid)
        .collect()
}
