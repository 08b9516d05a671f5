//! Geometry reuse across runs, dropped when the calibration changes.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::StartDoc;
use crate::errors::KernelError;
use crate::kernels::{Calibration, Geometry, GeometryFactory, CALIBRATION_KEYS};
use crate::streams::Unique;

type InvalidationHook = Arc<dyn Fn(&str) + Send + Sync>;

struct CacheState {
    history: Unique<String>,
    geometries: Vec<Arc<dyn Geometry>>,
    invalidations: usize,
}

/// A [`GeometryFactory`] that hands out the same geometry for the same
/// calibration until the calibration identity of the runs changes.
///
/// Every run's start document goes through [`observe_run`]. When its
/// calibration identity is not among the last `history` identities, every
/// cached geometry is dropped and the invalidation hook fires once.
///
/// [`observe_run`]: CachedGeometryFactory::observe_run
pub struct CachedGeometryFactory {
    inner: Arc<dyn GeometryFactory>,
    key: String,
    state: Mutex<CacheState>,
    hook: Option<InvalidationHook>,
}

impl std::fmt::Debug for CachedGeometryFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CachedGeometryFactory")
            .field("key", &self.key)
            .field("cached", &state.geometries.len())
            .field("invalidations", &state.invalidations)
            .finish_non_exhaustive()
    }
}

impl CachedGeometryFactory {
    /// Caches geometries built by `inner`, keyed on the start field `key`.
    pub fn new(inner: Arc<dyn GeometryFactory>, key: impl Into<String>, history: Option<usize>) -> Self {
        Self {
            inner,
            key: key.into(),
            state: Mutex::new(CacheState {
                history: Unique::new(history),
                geometries: Vec::new(),
                invalidations: 0,
            }),
            hook: None,
        }
    }

    /// Calls `hook` with the new identity each time the cache is dropped.
    #[must_use]
    pub fn with_invalidation_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// The calibration identity of a run: the configured key, else the
    /// calibration stored in the start document.
    fn identity(&self, start: &StartDoc) -> Option<String> {
        start
            .get(&self.key)
            .or_else(|| CALIBRATION_KEYS.iter().find_map(|k| start.get(k)))
            .map(ToString::to_string)
    }

    /// Records a new run. Returns true if the cache was invalidated.
    pub fn observe_run(&self, start: &StartDoc) -> bool {
        let Some(identity) = self.identity(start) else {
            debug!(run_start = %start.uid, "run carries no calibration identity");
            return false;
        };
        let invalidated = {
            let mut state = self.state.lock();
            let is_new = state.history.observe(&identity);
            let invalidate = is_new && !state.geometries.is_empty();
            if invalidate {
                state.geometries.clear();
                state.invalidations += 1;
            }
            invalidate
        };
        if invalidated {
            info!(run_start = %start.uid, calibration = %identity, "calibration changed, geometry cache cleared");
            if let Some(hook) = &self.hook {
                hook(&identity);
            }
        }
        invalidated
    }

    /// Number of times the cache was dropped.
    #[must_use]
    pub fn invalidations(&self) -> usize {
        self.state.lock().invalidations
    }

    /// Number of cached geometries.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.state.lock().geometries.len()
    }
}

impl GeometryFactory for CachedGeometryFactory {
    fn build(&self, calibration: &Calibration) -> Result<Arc<dyn Geometry>, KernelError> {
        let mut state = self.state.lock();
        if let Some(hit) = state.geometries.iter().find(|g| g.calibration() == calibration) {
            return Ok(Arc::clone(hit));
        }
        let geometry = self.inner.build(calibration)?;
        state.geometries.push(Arc::clone(&geometry));
        Ok(geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountingFactory;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn start(cal_uid: &str) -> StartDoc {
        let md = json!({"calibration_collection_uid": cal_uid});
        StartDoc::new(md.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn test_same_calibration_reuses_geometry() {
        let counting = Arc::new(CountingFactory::new());
        let cache = CachedGeometryFactory::new(counting.clone(), "calibration_collection_uid", Some(1));
        let cal = Calibration::new(0.2, 0.02, 0.02);

        assert!(!cache.observe_run(&start("a")));
        let first = cache.build(&cal).unwrap();
        assert!(!cache.observe_run(&start("a")));
        let second = cache.build(&cal).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counting.build_count(), 1);
    }

    #[test]
    fn test_changed_identity_fires_hook_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&fired);
        let counting = Arc::new(CountingFactory::new());
        let cache = CachedGeometryFactory::new(counting.clone(), "calibration_collection_uid", Some(1))
            .with_invalidation_hook(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        let cal = Calibration::new(0.2, 0.02, 0.02);

        cache.observe_run(&start("a"));
        cache.build(&cal).unwrap();
        assert!(cache.observe_run(&start("b")));
        assert!(!cache.observe_run(&start("b")));
        assert_eq!(cache.cached(), 0);
        cache.build(&cal).unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(cache.invalidations(), 1);
        assert_eq!(counting.build_count(), 2);
    }

    #[test]
    fn test_falls_back_to_stored_calibration() {
        let cache = CachedGeometryFactory::new(Arc::new(CountingFactory::new()), "missing", None);
        let cal = Calibration::new(0.2, 0.02, 0.02);
        let mut md = serde_json::Map::new();
        md.insert("calibration_md".into(), cal.to_json());
        let run = StartDoc::new(md);
        cache.observe_run(&run);
        cache.build(&cal).unwrap();
        assert!(!cache.observe_run(&run));
        assert!(!cache.observe_run(&StartDoc::new(serde_json::Map::new())));
        assert_eq!(cache.cached(), 1);
    }
}
