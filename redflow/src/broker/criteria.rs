//! Equality queries over start documents.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::StartDoc;

/// A conjunction of `key == value` tests on start documents.
///
/// Keys may be dotted paths into nested metadata. `uid` matches the start
/// uid itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Criteria(BTreeMap<String, serde_json::Value>);

impl Criteria {
    /// Matches every run.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `key == value` test.
    #[must_use]
    pub fn with_eq(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Runs with start uid `uid`.
    #[must_use]
    pub fn uid(uid: impl Into<String>) -> Self {
        Self::new().with_eq("uid", uid.into())
    }

    /// The key/value tests.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }

    /// True if `start` passes every test.
    #[must_use]
    pub fn matches(&self, start: &StartDoc) -> bool {
        self.0.iter().all(|(key, expected)| {
            if key == "uid" {
                return expected.as_str() == Some(start.uid.as_str());
            }
            start.get(key) == Some(expected)
        })
    }
}

impl std::fmt::Display for Criteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}
