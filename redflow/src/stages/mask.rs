//! Masking stages. Every output event carries one `mask` field, `true` = good.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::dark::default_image_field;
use super::geometry_input::{default_calibration_field, GeometrySlot};
use super::mask_input::{attach_mask, MaskInput, MaskSlot, MASK_FIELD};
use super::{EventData, StageInput, StageKernel, StageMachine};
use crate::core::{DataKey, DataValue, DocStream, EventDoc};
use crate::errors::ConfigError;
use crate::kernels::{margin, mask_img, GeometryFactory, MaskParams};
use crate::provenance::Provenance;

const fn default_edge() -> usize {
    30
}

fn mask_key(shape: Option<Vec<usize>>) -> BTreeMap<String, DataKey> {
    BTreeMap::from([(MASK_FIELD.to_string(), DataKey::array("analysis", shape))])
}

fn mask_data(mask: Option<Array2<bool>>) -> EventData {
    EventData::from([(MASK_FIELD.to_string(), DataValue::from(mask))])
}

fn image_of<'a>(event: &'a EventDoc, field: &str) -> anyhow::Result<&'a Arc<Array2<f64>>> {
    Ok(event.require(field)?.expect_image(field)?)
}

/// Parameters of [`margin_mask`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginMaskConfig {
    /// Image field of the input stream.
    #[serde(default = "default_image_field")]
    pub image_field: String,
    /// Border width in pixels.
    #[serde(default = "default_edge")]
    pub edge: usize,
}

impl Default for MarginMaskConfig {
    fn default() -> Self {
        Self {
            image_field: default_image_field(),
            edge: default_edge(),
        }
    }
}

impl MarginMaskConfig {
    /// Sets the image field.
    #[must_use]
    pub fn with_image_field(mut self, field: impl Into<String>) -> Self {
        self.image_field = field.into();
        self
    }

    /// Sets the border width.
    #[must_use]
    pub const fn with_edge(mut self, edge: usize) -> Self {
        self.edge = edge;
        self
    }
}

/// Kernel of [`margin_mask`].
#[derive(Debug)]
pub struct MarginMask {
    config: MarginMaskConfig,
    base: MaskSlot,
    names: Vec<String>,
    parent: Option<String>,
}

impl StageKernel for MarginMask {
    fn name(&self) -> &'static str {
        "margin_mask"
    }

    fn input_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn provenance(&self) -> Provenance {
        Provenance::new(self.name(), "margin").with_kwargs(&self.config)
    }

    fn fallback_keys(&self) -> BTreeMap<String, DataKey> {
        mask_key(None)
    }

    fn extra_parents(&self) -> Vec<String> {
        self.parent.iter().cloned().collect()
    }

    fn prepare(&mut self, primary: &StageInput, aux: &mut [StageInput]) -> anyhow::Result<BTreeMap<String, DataKey>> {
        self.base.prepare(aux)?;
        Ok(mask_key(primary.shape_of(&self.config.image_field)))
    }

    fn process(&mut self, event: &EventDoc, aux: &mut [StageInput]) -> anyhow::Result<EventData> {
        let shape = image_of(event, &self.config.image_field)?.dim();
        let mut mask = margin(shape, self.config.edge);
        if let Some(base) = self.base.current(aux, shape)? {
            mask &= base.as_ref();
        }
        Ok(mask_data(Some(mask)))
    }
}

/// Masks a border of every image, intersected with an optional base mask.
pub fn margin_mask(
    image: DocStream,
    mask: MaskInput,
    config: MarginMaskConfig,
) -> Result<StageMachine<MarginMask>, ConfigError> {
    let mut names = vec!["image".to_string()];
    let mut streams = vec![image];
    let (base, parent) = attach_mask(mask, &mut names, &mut streams);
    StageMachine::new(
        MarginMask {
            config,
            base,
            names,
            parent,
        },
        streams,
    )
}

/// Parameters of [`auto_mask`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoMaskConfig {
    /// Image field of the input stream.
    #[serde(default = "default_image_field")]
    pub image_field: String,
    /// Calibration field of the calibration stream.
    #[serde(default = "default_calibration_field")]
    pub calibration_field: String,
    /// The masking heuristic's parameters.
    #[serde(flatten)]
    pub params: MaskParams,
}

impl Default for AutoMaskConfig {
    fn default() -> Self {
        Self {
            image_field: default_image_field(),
            calibration_field: default_calibration_field(),
            params: MaskParams::default(),
        }
    }
}

impl AutoMaskConfig {
    /// Sets the image field.
    #[must_use]
    pub fn with_image_field(mut self, field: impl Into<String>) -> Self {
        self.image_field = field.into();
        self
    }

    /// Replaces the heuristic's parameters.
    #[must_use]
    pub fn with_params(mut self, params: MaskParams) -> Self {
        self.params = params;
        self
    }

    /// Rejects negative or non-finite parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.params;
        let checks = [
            ("alpha", p.alpha),
            ("bs_width", p.bs_width),
            ("tri_offset", p.tri_offset),
            ("v_asym", p.v_asym),
        ];
        for (name, value) in checks {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(ConfigError::invalid_parameter(name, format!("must be a non-negative number, got {v}")));
                }
            }
        }
        Ok(())
    }
}

/// Kernel of [`auto_mask`].
#[derive(Debug)]
pub struct AutoMask {
    config: AutoMaskConfig,
    geometry: GeometrySlot,
    base: MaskSlot,
    names: Vec<String>,
    parent: Option<String>,
}

impl StageKernel for AutoMask {
    fn name(&self) -> &'static str {
        "auto_mask"
    }

    fn input_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn provenance(&self) -> Provenance {
        Provenance::new(self.name(), "mask_img").with_kwargs(&self.config)
    }

    fn fallback_keys(&self) -> BTreeMap<String, DataKey> {
        mask_key(None)
    }

    fn extra_parents(&self) -> Vec<String> {
        self.parent.iter().cloned().collect()
    }

    fn prepare(&mut self, primary: &StageInput, aux: &mut [StageInput]) -> anyhow::Result<BTreeMap<String, DataKey>> {
        let calibration = aux
            .first_mut()
            .ok_or_else(|| anyhow::anyhow!("calibration input missing"))?;
        self.geometry.load(calibration)?;
        self.base.prepare(aux)?;
        Ok(mask_key(primary.shape_of(&self.config.image_field)))
    }

    fn process(&mut self, event: &EventDoc, aux: &mut [StageInput]) -> anyhow::Result<EventData> {
        let image = image_of(event, &self.config.image_field)?;
        let base = self.base.current(aux, image.dim())?;
        let geometry = self.geometry.get()?;
        let mask = mask_img(image, geometry.as_ref(), &self.config.params, base.as_deref());
        Ok(mask_data(Some(mask)))
    }
}

/// Runs the full masking heuristic on every image.
pub fn auto_mask(
    image: DocStream,
    calibration: DocStream,
    mask: MaskInput,
    config: AutoMaskConfig,
    factory: Arc<dyn GeometryFactory>,
) -> Result<StageMachine<AutoMask>, ConfigError> {
    config.validate()?;
    let mut names = vec!["image".to_string(), "calibration".to_string()];
    let mut streams = vec![image, calibration];
    let (base, parent) = attach_mask(mask, &mut names, &mut streams);
    let geometry = GeometrySlot::new(factory, config.calibration_field.clone());
    StageMachine::new(
        AutoMask {
            config,
            geometry,
            base,
            names,
            parent,
        },
        streams,
    )
}

/// Kernel of [`static_mask`].
#[derive(Debug)]
pub struct StaticMask {
    image_field: String,
    mask: MaskSlot,
    names: Vec<String>,
    parent: Option<String>,
}

impl StageKernel for StaticMask {
    fn name(&self) -> &'static str {
        "static_mask"
    }

    fn input_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn provenance(&self) -> Provenance {
        Provenance::new(self.name(), "mask_setting")
            .with_kwargs(&serde_json::json!({ "image_field": self.image_field }))
    }

    fn fallback_keys(&self) -> BTreeMap<String, DataKey> {
        mask_key(None)
    }

    fn extra_parents(&self) -> Vec<String> {
        self.parent.iter().cloned().collect()
    }

    fn prepare(&mut self, primary: &StageInput, aux: &mut [StageInput]) -> anyhow::Result<BTreeMap<String, DataKey>> {
        self.mask.prepare(aux)?;
        Ok(mask_key(primary.shape_of(&self.image_field)))
    }

    fn process(&mut self, event: &EventDoc, aux: &mut [StageInput]) -> anyhow::Result<EventData> {
        let shape = image_of(event, &self.image_field)?.dim();
        let mask = self.mask.current(aux, shape)?;
        Ok(mask_data(mask.map(|m| Arc::try_unwrap(m).unwrap_or_else(|shared| (*shared).clone()))))
    }
}

/// Emits a fixed mask, or `null` when there is none, once per image.
///
/// This is how a caller-supplied mask setting enters the pipeline as a
/// stream: an array, a mask file, the start document's compressed mask, or
/// no mask at all.
pub fn static_mask(
    image: DocStream,
    mask: MaskInput,
    image_field: impl Into<String>,
) -> Result<StageMachine<StaticMask>, ConfigError> {
    let mut names = vec!["image".to_string()];
    let mut streams = vec![image];
    let (slot, parent) = attach_mask(mask, &mut names, &mut streams);
    StageMachine::new(
        StaticMask {
            image_field: image_field.into(),
            mask: slot,
            names,
            parent,
        },
        streams,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{compress_mask, Calibration};
    use crate::stages::{default_factory, IMAGE_FIELD};
    use crate::testing::{assert_failure, assert_parents, assert_protocol, assert_success, calibration_run, RunBuilder};
    use pretty_assertions::assert_eq;

    fn masks(docs: &[crate::core::Document]) -> Vec<DataValue> {
        docs.iter()
            .filter_map(|d| d.as_event())
            .map(|ev| ev.data[MASK_FIELD].clone())
            .collect()
    }

    fn base_mask() -> Array2<bool> {
        let mut m = Array2::from_elem((12, 12), true);
        m[(6, 6)] = false;
        m[(1, 6)] = false;
        m
    }

    #[test]
    fn test_margin_with_constant_base() {
        let images = RunBuilder::new()
            .image_events(IMAGE_FIELD, vec![Array2::ones((12, 12)); 3])
            .build();
        let config = MarginMaskConfig::default().with_edge(2);
        let docs: Vec<_> = margin_mask(images.stream(), MaskInput::constant(base_mask()), config)
            .unwrap()
            .collect();
        assert_protocol(&docs);
        assert_success(&docs);
        let expected = &margin((12, 12), 2) & &base_mask();
        for m in masks(&docs) {
            assert_eq!(**m.as_mask().unwrap(), expected);
        }
    }

    #[test]
    fn test_margin_with_single_event_mask_stream() {
        let images = RunBuilder::new()
            .image_events(IMAGE_FIELD, vec![Array2::ones((12, 12)); 3])
            .build();
        let base = RunBuilder::new().mask_events(vec![base_mask()]).build();
        let config = MarginMaskConfig::default().with_edge(2);
        let docs: Vec<_> = margin_mask(images.stream(), MaskInput::Detect(base.stream()), config)
            .unwrap()
            .collect();
        assert_parents(&docs, &[images.start_uid(), base.start_uid()]);
        let expected = &margin((12, 12), 2) & &base_mask();
        let out = masks(&docs);
        assert_eq!(out.len(), 3);
        for m in out {
            assert_eq!(**m.as_mask().unwrap(), expected);
        }
    }

    #[test]
    fn test_margin_with_live_mask_stream() {
        let images = RunBuilder::new()
            .image_events(IMAGE_FIELD, vec![Array2::ones((6, 6)); 2])
            .build();
        let mut second = Array2::from_elem((6, 6), true);
        second[(3, 3)] = false;
        let live = RunBuilder::new()
            .mask_events(vec![Array2::from_elem((6, 6), true), second])
            .build();
        let docs: Vec<_> = margin_mask(images.stream(), MaskInput::Detect(live.stream()), MarginMaskConfig::default().with_edge(1))
            .unwrap()
            .collect();
        let out = masks(&docs);
        assert!(out[0].as_mask().unwrap()[(3, 3)]);
        assert!(!out[1].as_mask().unwrap()[(3, 3)]);
    }

    #[test]
    fn test_constant_mask_parent_is_recorded() {
        let images = RunBuilder::new()
            .image_events(IMAGE_FIELD, vec![Array2::ones((12, 12))])
            .build();
        let base = RunBuilder::new().mask_events(vec![base_mask()]).build();
        let input = crate::stages::classify_mask_stream(base.stream()).unwrap();
        let docs: Vec<_> = margin_mask(images.stream(), input, MarginMaskConfig::default()).unwrap().collect();
        assert_parents(&docs, &[images.start_uid(), base.start_uid()]);
    }

    #[test]
    fn test_auto_mask_composes_with_base() {
        let images = RunBuilder::new()
            .image_events(IMAGE_FIELD, vec![Array2::from_elem((12, 12), 3.0); 2])
            .build();
        let cal = calibration_run(&Calibration::new(0.1, 0.0012, 0.0012).with_pixel_size(1e-4, 1e-4));
        let params = MaskParams::disabled().with_edge(Some(2)).with_thresholds(Some(1.0), None);
        let config = AutoMaskConfig::default().with_params(params);
        let docs: Vec<_> = auto_mask(images.stream(), cal.stream(), MaskInput::constant(base_mask()), config, default_factory())
            .unwrap()
            .collect();
        assert_protocol(&docs);
        assert_success(&docs);
        assert_parents(&docs, &[images.start_uid(), cal.start_uid()]);
        let expected = &margin((12, 12), 2) & &base_mask();
        for m in masks(&docs) {
            assert_eq!(**m.as_mask().unwrap(), expected);
        }
    }

    #[test]
    fn test_auto_mask_rejects_negative_alpha() {
        let config = AutoMaskConfig::default().with_params(MaskParams::default().with_alpha(Some(-1.0)));
        let err = auto_mask(
            RunBuilder::new().build().stream(),
            RunBuilder::new().build().stream(),
            MaskInput::None,
            config,
            default_factory(),
        )
        .unwrap_err();
        assert_eq!(err.info.code, "CONFIG-PARAMETER");
    }

    #[test]
    fn test_static_mask_none_emits_null() {
        let images = RunBuilder::new()
            .image_events(IMAGE_FIELD, vec![Array2::ones((4, 4)); 3])
            .build();
        let docs: Vec<_> = static_mask(images.stream(), MaskInput::None, IMAGE_FIELD).unwrap().collect();
        assert_protocol(&docs);
        assert_success(&docs);
        let out = masks(&docs);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(DataValue::is_null));
    }

    #[test]
    fn test_static_mask_expands_compressed() {
        let images = RunBuilder::new()
            .image_events(IMAGE_FIELD, vec![Array2::ones((12, 12)); 2])
            .build();
        let compressed = MaskInput::Compressed(compress_mask(&base_mask()));
        let docs: Vec<_> = static_mask(images.stream(), compressed, IMAGE_FIELD).unwrap().collect();
        for m in masks(&docs) {
            assert_eq!(**m.as_mask().unwrap(), base_mask());
        }
    }

    #[test]
    fn test_mask_shape_mismatch_fails() {
        let images = RunBuilder::new()
            .image_events(IMAGE_FIELD, vec![Array2::ones((4, 4))])
            .build();
        let docs: Vec<_> = static_mask(images.stream(), MaskInput::constant(base_mask()), IMAGE_FIELD)
            .unwrap()
            .collect();
        assert_protocol(&docs);
        assert_failure(&docs);
    }
}
