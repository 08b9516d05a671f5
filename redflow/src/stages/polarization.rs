//! Polarization correction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::dark::{default_image_field, image_key, IMAGE_FIELD};
use super::geometry_input::{default_calibration_field, GeometrySlot};
use super::{EventData, StageInput, StageKernel, StageMachine};
use crate::core::{DataKey, DataValue, DocStream, EventDoc};
use crate::errors::ConfigError;
use crate::kernels::{correct_polarization, GeometryFactory};
use crate::provenance::Provenance;

const fn default_polarization_factor() -> f64 {
    0.99
}

/// Parameters of [`polarization_correction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolarizationConfig {
    /// Image field of the input stream.
    #[serde(default = "default_image_field")]
    pub image_field: String,
    /// Polarization factor in `[-1, 1]`.
    #[serde(default = "default_polarization_factor")]
    pub polarization_factor: f64,
    /// Calibration field of the calibration stream.
    #[serde(default = "default_calibration_field")]
    pub calibration_field: String,
}

impl Default for PolarizationConfig {
    fn default() -> Self {
        Self {
            image_field: default_image_field(),
            polarization_factor: default_polarization_factor(),
            calibration_field: default_calibration_field(),
        }
    }
}

impl PolarizationConfig {
    /// Sets the image field.
    #[must_use]
    pub fn with_image_field(mut self, field: impl Into<String>) -> Self {
        self.image_field = field.into();
        self
    }

    /// Sets the polarization factor.
    #[must_use]
    pub const fn with_polarization_factor(mut self, factor: f64) -> Self {
        self.polarization_factor = factor;
        self
    }

    /// Checks the factor is within `[-1, 1]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-1.0..=1.0).contains(&self.polarization_factor) {
            return Err(ConfigError::invalid_parameter(
                "polarization_factor",
                format!("must be within [-1, 1], got {}", self.polarization_factor),
            ));
        }
        Ok(())
    }
}

/// Kernel of [`polarization_correction`].
#[derive(Debug)]
pub struct PolarizationCorrection {
    config: PolarizationConfig,
    geometry: GeometrySlot,
}

impl StageKernel for PolarizationCorrection {
    fn name(&self) -> &'static str {
        "polarization_correction"
    }

    fn input_names(&self) -> Vec<String> {
        vec!["image".to_string(), "calibration".to_string()]
    }

    fn provenance(&self) -> Provenance {
        Provenance::new(self.name(), "correct_polarization").with_kwargs(&self.config)
    }

    fn fallback_keys(&self) -> BTreeMap<String, DataKey> {
        image_key(None)
    }

    fn prepare(&mut self, primary: &StageInput, aux: &mut [StageInput]) -> anyhow::Result<BTreeMap<String, DataKey>> {
        let [calibration] = aux else {
            anyhow::bail!("calibration input missing");
        };
        self.geometry.load(calibration)?;
        Ok(image_key(primary.shape_of(&self.config.image_field)))
    }

    fn process(&mut self, event: &EventDoc, _aux: &mut [StageInput]) -> anyhow::Result<EventData> {
        let image = event.require(&self.config.image_field)?.expect_image(&self.config.image_field)?;
        let out = correct_polarization(self.geometry.get()?.as_ref(), image, self.config.polarization_factor)?;
        Ok(EventData::from([(IMAGE_FIELD.to_string(), DataValue::image(out))]))
    }
}

/// Divides every image by the polarization factor of the run's geometry.
///
/// The geometry is built once from the first calibration event.
pub fn polarization_correction(
    image: DocStream,
    calibration: DocStream,
    config: PolarizationConfig,
    factory: Arc<dyn GeometryFactory>,
) -> Result<StageMachine<PolarizationCorrection>, ConfigError> {
    config.validate()?;
    let geometry = GeometrySlot::new(factory, config.calibration_field.clone());
    StageMachine::new(PolarizationCorrection { config, geometry }, vec![image, calibration])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::Calibration;
    use crate::stages::default_factory;
    use crate::testing::{assert_failure, assert_protocol, assert_success, calibration_run, RunBuilder};
    use ndarray::Array2;
    use pretty_assertions::assert_eq;

    fn calibration() -> Calibration {
        Calibration::new(0.2, 0.0008, 0.0008).with_wavelength(1.8e-11)
    }

    #[test]
    fn test_correction_keeps_centre_and_raises_edges() {
        let images = RunBuilder::new()
            .image_events(IMAGE_FIELD, vec![Array2::ones((8, 8)); 2])
            .build();
        let cal = calibration_run(&calibration());
        let docs: Vec<_> = polarization_correction(images.stream(), cal.stream(), PolarizationConfig::default(), default_factory())
            .unwrap()
            .collect();
        assert_protocol(&docs);
        assert_success(&docs);
        let ev = docs[2].as_event().unwrap();
        let out = ev.data[IMAGE_FIELD].as_image().unwrap();
        assert!((out[(4, 4)] - 1.0).abs() < 1e-3);
        assert!(out[(0, 0)] >= out[(4, 4)]);
    }

    #[test]
    fn test_factor_out_of_range() {
        let config = PolarizationConfig::default().with_polarization_factor(1.5);
        let err = polarization_correction(
            RunBuilder::new().build().stream(),
            RunBuilder::new().build().stream(),
            config,
            default_factory(),
        )
        .unwrap_err();
        assert_eq!(err.info.code, "CONFIG-PARAMETER");
    }

    #[test]
    fn test_bad_calibration_fails_run() {
        let images = RunBuilder::new()
            .image_events(IMAGE_FIELD, vec![Array2::ones((4, 4))])
            .build();
        let cal = RunBuilder::new()
            .json_events("calibration", vec![serde_json::json!({"dist": -1.0, "poni1": 0.0, "poni2": 0.0})])
            .build();
        let docs: Vec<_> = polarization_correction(images.stream(), cal.stream(), PolarizationConfig::default(), default_factory())
            .unwrap()
            .collect();
        assert_protocol(&docs);
        let stop = assert_failure(&docs);
        assert!(stop.reason.as_deref().unwrap().contains("dist"));
    }
}
