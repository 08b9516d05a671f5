//! Azimuthal integration into `(q, iq)` curves.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::dark::default_image_field;
use super::geometry_input::{default_calibration_field, GeometrySlot};
use super::mask_input::{attach_mask, MaskInput, MaskSlot};
use super::{EventData, StageInput, StageKernel, StageMachine};
use crate::core::{DataKey, DataValue, DocStream, EventDoc};
use crate::errors::ConfigError;
use crate::kernels::{default_npt, GeometryFactory, RadialUnit};
use crate::provenance::Provenance;

/// Radial axis field.
pub const Q_FIELD: &str = "q";
/// Intensity field.
pub const IQ_FIELD: &str = "iq";

#[allow(clippy::unnecessary_wraps)]
const fn default_npt_setting() -> Option<usize> {
    Some(1500)
}

/// Parameters of [`integrate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// Image field of the input stream.
    #[serde(default = "default_image_field")]
    pub image_field: String,
    /// Number of bins. `None` derives it from the detector diagonal.
    #[serde(default = "default_npt_setting")]
    pub npt: Option<usize>,
    /// Radial unit of the `q` output.
    #[serde(default)]
    pub unit: RadialUnit,
    /// Calibration field of the calibration stream.
    #[serde(default = "default_calibration_field")]
    pub calibration_field: String,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            image_field: default_image_field(),
            npt: default_npt_setting(),
            unit: RadialUnit::default(),
            calibration_field: default_calibration_field(),
        }
    }
}

impl IntegrationConfig {
    /// Sets the image field.
    #[must_use]
    pub fn with_image_field(mut self, field: impl Into<String>) -> Self {
        self.image_field = field.into();
        self
    }

    /// Sets the number of bins.
    #[must_use]
    pub const fn with_npt(mut self, npt: Option<usize>) -> Self {
        self.npt = npt;
        self
    }

    /// Sets the radial unit.
    #[must_use]
    pub const fn with_unit(mut self, unit: RadialUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Rejects a zero bin count.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.npt == Some(0) {
            return Err(ConfigError::invalid_parameter("npt", "must be positive"));
        }
        Ok(())
    }
}

/// Kernel of [`integrate`].
#[derive(Debug)]
pub struct Integration {
    config: IntegrationConfig,
    geometry: GeometrySlot,
    mask: MaskSlot,
    names: Vec<String>,
    parent: Option<String>,
    npt: usize,
}

impl StageKernel for Integration {
    fn name(&self) -> &'static str {
        "integrate"
    }

    fn input_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn provenance(&self) -> Provenance {
        Provenance::new(self.name(), "integrate1d").with_kwargs(&self.config)
    }

    fn fallback_keys(&self) -> BTreeMap<String, DataKey> {
        BTreeMap::from([
            (Q_FIELD.to_string(), DataKey::array("analysis", None)),
            (IQ_FIELD.to_string(), DataKey::array("analysis", None)),
        ])
    }

    fn extra_parents(&self) -> Vec<String> {
        self.parent.iter().cloned().collect()
    }

    fn prepare(&mut self, primary: &StageInput, aux: &mut [StageInput]) -> anyhow::Result<BTreeMap<String, DataKey>> {
        let calibration = aux
            .first_mut()
            .ok_or_else(|| anyhow::anyhow!("calibration input missing"))?;
        let geometry = self.geometry.load(calibration)?;
        self.mask.prepare(aux)?;
        let shape = primary
            .shape_of(&self.config.image_field)
            .and_then(|s| match s.as_slice() {
                &[rows, cols] => Some((rows, cols)),
                _ => None,
            });
        self.npt = self
            .config
            .npt
            .unwrap_or_else(|| default_npt(geometry.calibration(), shape));
        let key = DataKey::array("analysis", Some(vec![self.npt]));
        Ok(BTreeMap::from([
            (Q_FIELD.to_string(), key.clone()),
            (IQ_FIELD.to_string(), key),
        ]))
    }

    fn process(&mut self, event: &EventDoc, aux: &mut [StageInput]) -> anyhow::Result<EventData> {
        let field = &self.config.image_field;
        let image = event.require(field)?.expect_image(field)?;
        let mask = self.mask.current(aux, image.dim())?;
        let excluded = mask.map(|m| m.mapv(|good| !good));
        let geometry = self.geometry.get()?;
        let (q, iq) = geometry.integrate1d(image, self.npt, excluded.as_ref(), self.config.unit)?;
        Ok(EventData::from([
            (Q_FIELD.to_string(), DataValue::curve(q)),
            (IQ_FIELD.to_string(), DataValue::curve(iq)),
        ]))
    }
}

/// Integrates every image into `npt` radial bins.
///
/// Masks use `true` for good pixels and are inverted before integration. A
/// `null` mask event integrates the whole image.
pub fn integrate(
    image: DocStream,
    calibration: DocStream,
    mask: MaskInput,
    config: IntegrationConfig,
    factory: Arc<dyn GeometryFactory>,
) -> Result<StageMachine<Integration>, ConfigError> {
    config.validate()?;
    let mut names = vec!["image".to_string(), "calibration".to_string()];
    let mut streams = vec![image, calibration];
    let (slot, parent) = attach_mask(mask, &mut names, &mut streams);
    let geometry = GeometrySlot::new(factory, config.calibration_field.clone());
    StageMachine::new(
        Integration {
            npt: config.npt.unwrap_or(0),
            config,
            geometry,
            mask: slot,
            names,
            parent,
        },
        streams,
    )
}
