use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// A runner's module/require cache, exposed as an explicit object so the
/// worker can purge state a test run loaded.
pub trait ModuleCache: Send {
    /// Identifiers of all currently loaded modules.
    fn loaded(&self) -> Vec<String>;

    fn remove(&mut self, id: &str);
}

/// Snapshot of the loaded-module set taken before a run; purging removes
/// everything added since, so one mutant's test files cannot leak into the
/// next run sharing the worker.
pub struct CacheRecorder {
    before: BTreeSet<String>,
}

impl CacheRecorder {
    pub fn record(cache: &dyn ModuleCache) -> CacheRecorder {
        CacheRecorder {
            before: cache.loaded().into_iter().collect(),
        }
    }

    pub fn purge(self, cache: &mut dyn ModuleCache) {
        for id in cache.loaded() {
            if !self.before.contains(&id) {
                cache.remove(&id);
            }
        }
    }
}

/// Clonable in-memory cache; all clones share the same loaded set. Used by
/// runners that track module state themselves.
#[derive(Debug, Clone, Default)]
pub struct SharedModuleCache {
    loaded: Arc<Mutex<BTreeSet<String>>>,
}

impl SharedModuleCache {
    pub fn insert(&self, id: impl Into<String>) {
        self.lock().insert(id.into());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.loaded.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ModuleCache for SharedModuleCache {
    fn loaded(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    fn remove(&mut self, id: &str) {
        self.lock().remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purge_removes_only_newly_loaded_modules() {
        let mut cache = SharedModuleCache::default();
        cache.insert("pre-existing");

        let recorder = CacheRecorder::record(&cache);
        cache.insert("loaded-by-test");
        cache.insert("another-one");
        recorder.purge(&mut cache);

        assert!(cache.contains("pre-existing"));
        assert!(!cache.contains("loaded-by-test"));
        assert!(!cache.contains("another-one"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn purge_with_no_additions_is_a_no_op() {
        let mut cache = SharedModuleCache::default();
        cache.insert("a");
        cache.insert("b");

        let recorder = CacheRecorder::record(&cache);
        recorder.purge(&mut cache);

        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn clones_share_state() {
        let cache = SharedModuleCache::default();
        let clone = cache.clone();
        cache.insert("m");
        assert!(clone.contains("m"));
    }
}
