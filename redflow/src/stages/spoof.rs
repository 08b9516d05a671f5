//! Republishes a start document field as a one-event analysis run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::geometry_input::default_calibration_field;
use super::{Cadence, EventData, StageInput, StageKernel, StageMachine};
use crate::core::{DataKey, DataValue, DocStream, EventDoc};
use crate::errors::{ConfigError, KernelError};
use crate::kernels::CALIBRATION_KEYS;
use crate::provenance::Provenance;

fn default_start_key() -> String {
    CALIBRATION_KEYS[0].to_string()
}

fn default_fallback_keys() -> Vec<String> {
    CALIBRATION_KEYS[1..].iter().map(ToString::to_string).collect()
}

/// Parameters of [`spoof`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoofConfig {
    /// Start document key to read, dotted paths allowed.
    #[serde(default = "default_start_key")]
    pub start_key: String,
    /// Keys tried in order when `start_key` is absent.
    #[serde(default = "default_fallback_keys")]
    pub fallback_keys: Vec<String>,
    /// Field of the emitted event.
    #[serde(default = "default_calibration_field")]
    pub output_field: String,
}

impl Default for SpoofConfig {
    fn default() -> Self {
        Self {
            start_key: default_start_key(),
            fallback_keys: default_fallback_keys(),
            output_field: default_calibration_field(),
        }
    }
}

impl SpoofConfig {
    /// Reads `start_key` into `output_field`, with no fallbacks.
    #[must_use]
    pub fn new(start_key: impl Into<String>, output_field: impl Into<String>) -> Self {
        Self {
            start_key: start_key.into(),
            fallback_keys: Vec::new(),
            output_field: output_field.into(),
        }
    }

    /// Sets the fallback keys.
    #[must_use]
    pub fn with_fallback_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_keys = keys.into_iter().map(Into::into).collect();
        self
    }
}

/// Kernel of [`spoof`].
#[derive(Debug)]
pub struct Spoof {
    config: SpoofConfig,
    value: Option<DataValue>,
}

impl StageKernel for Spoof {
    fn name(&self) -> &'static str {
        "spoof"
    }

    fn input_names(&self) -> Vec<String> {
        vec!["raw".to_string()]
    }

    fn provenance(&self) -> Provenance {
        Provenance::new(self.name(), "start_lookup").with_kwargs(&self.config)
    }

    fn fallback_keys(&self) -> BTreeMap<String, DataKey> {
        BTreeMap::from([(self.config.output_field.clone(), DataKey::new("object", "analysis"))])
    }

    fn cadence(&self) -> Cadence {
        Cadence::Once
    }

    fn prepare(&mut self, primary: &StageInput, _aux: &mut [StageInput]) -> anyhow::Result<BTreeMap<String, DataKey>> {
        let start = primary
            .start()
            .ok_or_else(|| anyhow::anyhow!("raw start document missing"))?;
        let value = std::iter::once(&self.config.start_key)
            .chain(&self.config.fallback_keys)
            .find_map(|key| start.get(key))
            .ok_or_else(|| KernelError::MissingField {
                field: self.config.start_key.clone(),
            })?;
        let value = match value {
            serde_json::Value::Null => DataValue::Null,
            serde_json::Value::Bool(b) => DataValue::Bool(*b),
            serde_json::Value::String(s) => DataValue::Text(s.clone()),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map_or_else(|| DataValue::Float(n.as_f64().unwrap_or(f64::NAN)), DataValue::Int),
            other => DataValue::Json(other.clone()),
        };
        let key = DataKey::new(value.dtype(), "analysis");
        self.value = Some(value);
        Ok(BTreeMap::from([(self.config.output_field.clone(), key)]))
    }

    fn process(&mut self, _event: &EventDoc, _aux: &mut [StageInput]) -> anyhow::Result<EventData> {
        anyhow::bail!("spoof emits a single event")
    }

    fn process_once(&mut self, _aux: &mut [StageInput]) -> anyhow::Result<EventData> {
        let value = self
            .value
            .take()
            .ok_or_else(|| anyhow::anyhow!("start value not read"))?;
        Ok(EventData::from([(self.config.output_field.clone(), value)]))
    }
}

/// Reads a value out of the raw run's start document and emits it as the
/// only event of a new run, `seq_num` 0.
///
/// With the default configuration this turns the calibration stored with
/// a raw run into a calibration stream.
pub fn spoof(raw: DocStream, config: SpoofConfig) -> Result<StageMachine<Spoof>, ConfigError> {
    if config.start_key.is_empty() || config.output_field.is_empty() {
        return Err(ConfigError::invalid_parameter("start_key", "start key and output field must be non-empty"));
    }
    StageMachine::new(Spoof { config, value: None }, vec![raw])
}
