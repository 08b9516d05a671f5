//! Background subtraction: `foreground - background[k] * scale`.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::dark::{default_image_field, image_key, IMAGE_FIELD};
use super::{EventData, StageInput, StageKernel, StageMachine};
use crate::core::{DataKey, DataValue, DocStream, EventDoc};
use crate::errors::ConfigError;
use crate::kernels::subtract_scaled;
use crate::provenance::Provenance;

const fn default_scale() -> f64 {
    1.0
}

/// Parameters of [`background_subtraction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundSubtractionConfig {
    /// Image field of the foreground stream.
    #[serde(default = "default_image_field")]
    pub image_field: String,
    /// Image field of the background stream.
    #[serde(default = "default_image_field")]
    pub background_field: String,
    /// Which background event to use.
    #[serde(default)]
    pub background_event_number: usize,
    /// Multiplier applied to the background.
    #[serde(default = "default_scale")]
    pub scale: f64,
}

impl Default for BackgroundSubtractionConfig {
    fn default() -> Self {
        Self {
            image_field: default_image_field(),
            background_field: default_image_field(),
            background_event_number: 0,
            scale: default_scale(),
        }
    }
}

impl BackgroundSubtractionConfig {
    /// Sets the foreground image field.
    #[must_use]
    pub fn with_image_field(mut self, field: impl Into<String>) -> Self {
        self.image_field = field.into();
        self
    }

    /// Sets the background image field.
    #[must_use]
    pub fn with_background_field(mut self, field: impl Into<String>) -> Self {
        self.background_field = field.into();
        self
    }

    /// Sets the background event index.
    #[must_use]
    pub const fn with_background_event_number(mut self, n: usize) -> Self {
        self.background_event_number = n;
        self
    }

    /// Sets the background scale.
    #[must_use]
    pub const fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Rejects non-finite scales.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.scale.is_finite() {
            return Err(ConfigError::invalid_parameter("scale", format!("must be finite, got {}", self.scale)));
        }
        Ok(())
    }
}

/// Kernel of [`background_subtraction`].
#[derive(Debug)]
pub struct BackgroundSubtraction {
    config: BackgroundSubtractionConfig,
    background: Option<Arc<Array2<f64>>>,
}

impl StageKernel for BackgroundSubtraction {
    fn name(&self) -> &'static str {
        "background_subtraction"
    }

    fn input_names(&self) -> Vec<String> {
        vec!["foreground".to_string(), "background".to_string()]
    }

    fn provenance(&self) -> Provenance {
        Provenance::new(self.name(), "subtract_scaled").with_kwargs(&self.config)
    }

    fn fallback_keys(&self) -> BTreeMap<String, DataKey> {
        image_key(None)
    }

    fn prepare(&mut self, primary: &StageInput, aux: &mut [StageInput]) -> anyhow::Result<BTreeMap<String, DataKey>> {
        let [background] = aux else {
            anyhow::bail!("background input missing");
        };
        let field = &self.config.background_field;
        let frame = background.event_at(self.config.background_event_number)?;
        let image = Arc::clone(frame.require(field)?.expect_image(field)?);
        background.release();
        self.background = Some(image);
        Ok(image_key(primary.shape_of(&self.config.image_field)))
    }

    fn process(&mut self, event: &EventDoc, _aux: &mut [StageInput]) -> anyhow::Result<EventData> {
        let foreground = event.require(&self.config.image_field)?.expect_image(&self.config.image_field)?;
        let background = self
            .background
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("background frame not loaded"))?;
        let out = subtract_scaled(foreground, background, self.config.scale)?;
        Ok(EventData::from([(IMAGE_FIELD.to_string(), DataValue::image(out))]))
    }
}

/// Subtracts a scaled background frame from every foreground image.
pub fn background_subtraction(
    foreground: DocStream,
    background: DocStream,
    config: BackgroundSubtractionConfig,
) -> Result<StageMachine<BackgroundSubtraction>, ConfigError> {
    config.validate()?;
    StageMachine::new(
        BackgroundSubtraction {
            config,
            background: None,
        },
        vec![foreground, background],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{assert_failure, assert_protocol, assert_success, RunBuilder};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scaled_background() {
        let fg = RunBuilder::new()
            .image_events(IMAGE_FIELD, vec![Array2::from_elem((4, 4), 10.0); 3])
            .build();
        let bg = RunBuilder::new()
            .image_events(IMAGE_FIELD, vec![Array2::from_elem((4, 4), 4.0)])
            .build();
        let config = BackgroundSubtractionConfig::default().with_scale(0.5);
        let docs: Vec<_> = background_subtraction(fg.stream(), bg.stream(), config).unwrap().collect();
        assert_protocol(&docs);
        assert_success(&docs);
        let values: Vec<f64> = docs
            .iter()
            .filter_map(|d| d.as_event())
            .map(|ev| ev.data[IMAGE_FIELD].as_image().unwrap()[(0, 0)])
            .collect();
        assert_eq!(values, vec![8.0, 8.0, 8.0]);
    }

    #[test]
    fn test_background_index_out_of_range() {
        let fg = RunBuilder::new()
            .image_events(IMAGE_FIELD, vec![Array2::ones((2, 2)); 5])
            .build();
        let bg = RunBuilder::new()
            .image_events(IMAGE_FIELD, vec![Array2::zeros((2, 2)); 2])
            .build();
        let config = BackgroundSubtractionConfig::default().with_background_event_number(4);
        let docs: Vec<_> = background_subtraction(fg.stream(), bg.stream(), config).unwrap().collect();
        assert_protocol(&docs);
        assert_eq!(docs.iter().filter(|d| d.as_event().is_some()).count(), 0);
        let stop = assert_failure(&docs);
        assert!(stop.reason.as_deref().unwrap().contains("IndexError"));
    }

    #[test]
    fn test_rejects_nan_scale() {
        let config = BackgroundSubtractionConfig::default().with_scale(f64::NAN);
        let err = background_subtraction(RunBuilder::new().build().stream(), RunBuilder::new().build().stream(), config)
            .unwrap_err();
        assert_eq!(err.info.code, "CONFIG-PARAMETER");
    }
}
