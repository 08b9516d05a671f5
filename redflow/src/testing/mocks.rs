//! Recording doubles for the pipeline's seams.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::errors::KernelError;
use crate::kernels::{AzimuthalFactory, Calibration, Geometry, GeometryFactory};

/// A geometry factory that counts how often it is asked to build.
///
/// Wraps [`AzimuthalFactory`] unless another factory is given.
pub struct CountingFactory {
    inner: Arc<dyn GeometryFactory>,
    builds: Mutex<Vec<Calibration>>,
}

impl CountingFactory {
    /// Counts builds of the reference geometry.
    #[must_use]
    pub fn new() -> Self {
        Self::wrapping(Arc::new(AzimuthalFactory))
    }

    /// Counts builds of `inner`.
    #[must_use]
    pub fn wrapping(inner: Arc<dyn GeometryFactory>) -> Self {
        Self {
            inner,
            builds: Mutex::new(Vec::new()),
        }
    }

    /// Number of geometries built so far.
    #[must_use]
    pub fn build_count(&self) -> usize {
        self.builds.lock().len()
    }

    /// The calibrations every build was asked for, in order.
    #[must_use]
    pub fn recorded(&self) -> Vec<Calibration> {
        self.builds.lock().clone()
    }
}

impl Default for CountingFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CountingFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountingFactory")
            .field("builds", &self.build_count())
            .finish_non_exhaustive()
    }
}

impl GeometryFactory for CountingFactory {
    fn build(&self, calibration: &Calibration) -> Result<Arc<dyn Geometry>, KernelError> {
        self.builds.lock().push(calibration.clone());
        self.inner.build(calibration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_each_build() {
        let factory = CountingFactory::new();
        let cal = Calibration::new(0.2, 0.02, 0.02);
        factory.build(&cal).unwrap();
        factory.build(&cal).unwrap();
        assert_eq!(factory.build_count(), 2);
        assert_eq!(factory.recorded(), vec![cal.clone(), cal]);
    }
}
