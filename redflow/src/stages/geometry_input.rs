//! Geometry built once from the first event of a calibration stream.

use anyhow::Context;
use std::sync::Arc;

use super::StageInput;
use crate::kernels::{AzimuthalFactory, Calibration, Geometry, GeometryFactory};

/// Field that carries the calibration in a calibration stream's events.
pub const CALIBRATION_FIELD: &str = "calibration";

pub(crate) fn default_calibration_field() -> String {
    CALIBRATION_FIELD.to_string()
}

/// The reference geometry factory shared by stages built without one.
#[must_use]
pub fn default_factory() -> Arc<dyn GeometryFactory> {
    Arc::new(AzimuthalFactory)
}

pub(crate) struct GeometrySlot {
    factory: Arc<dyn GeometryFactory>,
    field: String,
    geometry: Option<Arc<dyn Geometry>>,
}

impl std::fmt::Debug for GeometrySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeometrySlot")
            .field("field", &self.field)
            .field("geometry", &self.geometry)
            .finish_non_exhaustive()
    }
}

impl GeometrySlot {
    pub(crate) fn new(factory: Arc<dyn GeometryFactory>, field: impl Into<String>) -> Self {
        Self {
            factory,
            field: field.into(),
            geometry: None,
        }
    }

    /// Reads the calibration from the input's first event, builds the
    /// geometry and releases the input.
    pub(crate) fn load(&mut self, input: &mut StageInput) -> anyhow::Result<Arc<dyn Geometry>> {
        let calibration = {
            let event = input.event_at(0).context("reading calibration")?;
            let value = event.require(&self.field)?.to_json();
            Calibration::from_json(&value)?
        };
        input.release();
        let geometry = self.factory.build(&calibration)?;
        self.geometry = Some(Arc::clone(&geometry));
        Ok(geometry)
    }

    pub(crate) fn get(&self) -> anyhow::Result<&Arc<dyn Geometry>> {
        self.geometry
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("geometry used before the calibration was read"))
    }
}
