//! Dark subtraction: `light - dark` with one dark frame per run.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{EventData, StageInput, StageKernel, StageMachine};
use crate::core::{DataKey, DataValue, DocStream, EventDoc};
use crate::kernels::subtract;
use crate::provenance::Provenance;

/// Output field of image-producing stages.
pub const IMAGE_FIELD: &str = "img";

/// Detector image field of raw runs.
pub const RAW_IMAGE_FIELD: &str = "pe1_image";

pub(crate) fn default_raw_field() -> String {
    RAW_IMAGE_FIELD.to_string()
}

pub(crate) fn default_image_field() -> String {
    IMAGE_FIELD.to_string()
}

pub(crate) fn image_key(shape: Option<Vec<usize>>) -> BTreeMap<String, DataKey> {
    BTreeMap::from([(IMAGE_FIELD.to_string(), DataKey::array("analysis", shape))])
}

/// Parameters of [`dark_subtraction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DarkSubtractionConfig {
    /// Image field of the light stream.
    #[serde(default = "default_raw_field")]
    pub image_field: String,
    /// Image field of the dark stream.
    #[serde(default = "default_raw_field")]
    pub dark_field: String,
    /// Which dark event to use.
    #[serde(default)]
    pub dark_event_number: usize,
}

impl Default for DarkSubtractionConfig {
    fn default() -> Self {
        Self {
            image_field: default_raw_field(),
            dark_field: default_raw_field(),
            dark_event_number: 0,
        }
    }
}

impl DarkSubtractionConfig {
    /// Sets the light image field.
    #[must_use]
    pub fn with_image_field(mut self, field: impl Into<String>) -> Self {
        self.image_field = field.into();
        self
    }

    /// Sets the dark image field.
    #[must_use]
    pub fn with_dark_field(mut self, field: impl Into<String>) -> Self {
        self.dark_field = field.into();
        self
    }

    /// Sets the dark event index.
    #[must_use]
    pub const fn with_dark_event_number(mut self, n: usize) -> Self {
        self.dark_event_number = n;
        self
    }
}

/// Kernel of [`dark_subtraction`].
#[derive(Debug)]
pub struct DarkSubtraction {
    config: DarkSubtractionConfig,
    dark: Option<Arc<Array2<f64>>>,
}

impl StageKernel for DarkSubtraction {
    fn name(&self) -> &'static str {
        "dark_subtraction"
    }

    fn input_names(&self) -> Vec<String> {
        vec!["image".to_string(), "dark".to_string()]
    }

    fn provenance(&self) -> Provenance {
        Provenance::new(self.name(), "subtract").with_kwargs(&self.config)
    }

    fn fallback_keys(&self) -> BTreeMap<String, DataKey> {
        image_key(None)
    }

    fn prepare(&mut self, primary: &StageInput, aux: &mut [StageInput]) -> anyhow::Result<BTreeMap<String, DataKey>> {
        let [dark] = aux else {
            anyhow::bail!("dark input missing");
        };
        let frame = dark.event_at(self.config.dark_event_number)?;
        let image = Arc::clone(frame.require(&self.config.dark_field)?.expect_image(&self.config.dark_field)?);
        dark.release();
        self.dark = Some(image);
        Ok(image_key(primary.shape_of(&self.config.image_field)))
    }

    fn process(&mut self, event: &EventDoc, _aux: &mut [StageInput]) -> anyhow::Result<EventData> {
        let light = event.require(&self.config.image_field)?.expect_image(&self.config.image_field)?;
        let dark = self
            .dark
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("dark frame not loaded"))?;
        let out = subtract(light, dark)?;
        Ok(EventData::from([(IMAGE_FIELD.to_string(), DataValue::image(out))]))
    }
}

/// Subtracts one dark frame from every light image.
///
/// The dark frame is event `dark_event_number` of the dark run, read once
/// while the descriptor is built.
pub fn dark_subtraction(
    image: DocStream,
    dark: DocStream,
    config: DarkSubtractionConfig,
) -> Result<StageMachine<DarkSubtraction>, crate::errors::ConfigError> {
    StageMachine::new(DarkSubtraction { config, dark: None }, vec![image, dark])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ExitStatus;
    use crate::testing::{assert_failure, assert_parents, assert_protocol, assert_success, RunBuilder};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ones_minus_zeros() {
        let light = RunBuilder::new()
            .image_events(RAW_IMAGE_FIELD, vec![Array2::ones((10, 10)); 5])
            .build();
        let dark = RunBuilder::new()
            .image_events(RAW_IMAGE_FIELD, vec![Array2::zeros((10, 10))])
            .build();
        let docs: Vec<_> = dark_subtraction(light.stream(), dark.stream(), DarkSubtractionConfig::default())
            .unwrap()
            .collect();

        assert_protocol(&docs);
        assert_parents(&docs, &[light.start_uid(), dark.start_uid()]);
        assert_success(&docs);
        let events: Vec<_> = docs.iter().filter_map(|d| d.as_event()).collect();
        assert_eq!(events.len(), 5);
        for ev in events {
            assert_eq!(**ev.data[IMAGE_FIELD].as_image().unwrap(), Array2::<f64>::ones((10, 10)));
        }
        let desc = docs[1].as_descriptor().unwrap();
        assert_eq!(desc.shape_of(IMAGE_FIELD), Some(vec![10, 10]));
    }

    #[test]
    fn test_each_light_frame_keeps_its_order() {
        let frames: Vec<_> = (0..4).map(|i| Array2::from_elem((3, 3), f64::from(i) + 2.0)).collect();
        let light = RunBuilder::new().image_events(RAW_IMAGE_FIELD, frames.clone()).build();
        let dark = RunBuilder::new()
            .image_events(RAW_IMAGE_FIELD, vec![Array2::ones((3, 3)), Array2::from_elem((3, 3), 2.0)])
            .build();
        let config = DarkSubtractionConfig::default().with_dark_event_number(1);
        let out: Vec<_> = dark_subtraction(light.stream(), dark.stream(), config)
            .unwrap()
            .filter_map(|d| d.as_event().cloned())
            .collect();
        for (i, ev) in out.iter().enumerate() {
            assert_eq!(ev.seq_num, i as u64);
            assert_eq!(**ev.data[IMAGE_FIELD].as_image().unwrap(), &frames[i] - 2.0);
        }
    }

    #[test]
    fn test_shape_omitted_when_upstream_has_none() {
        let light = RunBuilder::new()
            .image_events(RAW_IMAGE_FIELD, vec![Array2::ones((2, 2))])
            .without_shapes()
            .build();
        let dark = RunBuilder::new()
            .image_events(RAW_IMAGE_FIELD, vec![Array2::zeros((2, 2))])
            .build();
        let docs: Vec<_> = dark_subtraction(light.stream(), dark.stream(), DarkSubtractionConfig::default())
            .unwrap()
            .collect();
        assert_eq!(docs[1].as_descriptor().unwrap().shape_of(IMAGE_FIELD), None);
        assert_success(&docs);
    }

    #[test]
    fn test_third_event_failure_is_contained() {
        let light = RunBuilder::new()
            .image_events(
                RAW_IMAGE_FIELD,
                vec![Array2::ones((2, 2)), Array2::ones((2, 2)), Array2::ones((3, 3)), Array2::ones((2, 2))],
            )
            .build();
        let dark = RunBuilder::new()
            .image_events(RAW_IMAGE_FIELD, vec![Array2::zeros((2, 2))])
            .build();
        let docs: Vec<_> = dark_subtraction(light.stream(), dark.stream(), DarkSubtractionConfig::default())
            .unwrap()
            .collect();
        assert_protocol(&docs);
        let stop = assert_failure(&docs);
        assert!(stop.reason.as_deref().unwrap().contains("shape"));
        assert_eq!(docs.iter().filter(|d| d.as_event().is_some()).count(), 2);
    }

    #[test]
    fn test_missing_dark_frame_fails_before_events() {
        let light = RunBuilder::new()
            .image_events(RAW_IMAGE_FIELD, vec![Array2::ones((2, 2))])
            .build();
        let dark = RunBuilder::new().build();
        let docs: Vec<_> = dark_subtraction(light.stream(), dark.stream(), DarkSubtractionConfig::default())
            .unwrap()
            .collect();
        assert_protocol(&docs);
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[2].as_stop().unwrap().exit_status, ExitStatus::Failure);
    }

    #[test]
    fn test_provenance_embeds_config() {
        let light = RunBuilder::new().build();
        let dark = RunBuilder::new().build();
        let config = DarkSubtractionConfig::default().with_dark_event_number(2);
        let mut stage = dark_subtraction(light.stream(), dark.stream(), config).unwrap();
        let start = stage.next().unwrap();
        let provenance = start.as_start().unwrap().provenance.clone().unwrap();
        assert_eq!(provenance.hfi, "dark_subtraction");
        assert_eq!(provenance.process, "subtract");
        assert_eq!(provenance.kwargs["dark_event_number"], 2);
        assert_eq!(provenance.inputs, vec!["image", "dark"]);
    }

    #[test]
    fn test_wrong_stream_count_is_config_error() {
        let kernel = DarkSubtraction {
            config: DarkSubtractionConfig::default(),
            dark: None,
        };
        let err = StageMachine::new(kernel, vec![RunBuilder::new().build().stream()]).unwrap_err();
        assert_eq!(err.info.code, "CONFIG-STREAM-COUNT");
    }
}
