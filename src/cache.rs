//! Process-wide memo of autotuned configurations
//!
//! Maps a [`ShapeSignature`] to the winning [`KernelConfig`]. Entries are
//! never evicted. Concurrent first-time searches for one signature are not
//! serialized: both run, and the last insert wins. Readers always observe a
//! complete entry.
//!
//! The cache is an ordinary value so tests can build their own; [`global`]
//! hands out the shared process instance.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::config::KernelConfig;
use crate::shape::ShapeSignature;

/// Thread-safe signature -> configuration map
#[derive(Debug, Default)]
pub struct ConfigCache {
    entries: RwLock<HashMap<ShapeSignature, KernelConfig>>,
}

impl ConfigCache {
    /// Empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Winner recorded for `signature`
    #[must_use]
    pub fn get(&self, signature: &ShapeSignature) -> Option<KernelConfig> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(signature)
            .copied()
    }

    /// Record `config` for `signature`, returning the entry it replaced
    pub fn insert(&self, signature: ShapeSignature, config: KernelConfig) -> Option<KernelConfig> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(signature, config)
    }

    /// Whether `signature` has been resolved
    #[must_use]
    pub fn contains(&self, signature: &ShapeSignature) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(signature)
    }

    /// Number of resolved signatures
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when nothing has been resolved
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Copy of all entries
    #[must_use]
    pub fn snapshot(&self) -> HashMap<ShapeSignature, KernelConfig> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Shared process-wide cache, created empty on first use
#[must_use]
pub fn global() -> Arc<ConfigCache> {
    static GLOBAL: OnceLock<Arc<ConfigCache>> = OnceLock::new();
    Arc::clone(GLOBAL.get_or_init(|| Arc::new(ConfigCache::new())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::KernelVariant;
    use crate::shape::ProblemShape;
    use std::thread;

    fn sig(n: usize) -> ShapeSignature {
        ProblemShape::new(1, n, 4096, 128, 8).signature(KernelVariant::GemvRevSplitK)
    }

    #[test]
    fn test_insert_get_clear() {
        let cache = ConfigCache::new();
        assert!(cache.is_empty());
        let c = KernelConfig::new(KernelVariant::GemvRevSplitK, 1, 256, 32);
        assert_eq!(cache.insert(sig(4096), c), None);
        assert_eq!(cache.get(&sig(4096)), Some(c));
        assert!(cache.contains(&sig(4096)));
        assert!(!cache.contains(&sig(2048)));
        assert_eq!(cache.snapshot().len(), 1);
        cache.clear();
        assert_eq!(cache.get(&sig(4096)), None);
    }

    #[test]
    fn test_last_writer_wins() {
        let cache = ConfigCache::new();
        let first = KernelConfig::new(KernelVariant::GemvRevSplitK, 1, 128, 32);
        let second = KernelConfig::new(KernelVariant::GemvRevSplitK, 1, 256, 16);
        cache.insert(sig(1024), first);
        assert_eq!(cache.insert(sig(1024), second), Some(first));
        assert_eq!(cache.get(&sig(1024)), Some(second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_writers_leave_one_complete_entry() {
        let cache = Arc::new(ConfigCache::new());
        let candidates: Vec<_> = [32, 64, 128, 256]
            .into_iter()
            .map(|bn| KernelConfig::new(KernelVariant::GemvRevSplitK, 1, bn, 32))
            .collect();
        let handles: Vec<_> = candidates
            .iter()
            .map(|&c| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    cache.insert(sig(512), c);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let winner = cache.get(&sig(512)).unwrap();
        assert!(candidates.contains(&winner));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_poisoned_lock_still_serves_entries() {
        let cache = Arc::new(ConfigCache::new());
        let c = KernelConfig::new(KernelVariant::GemvRevSplitK, 1, 256, 32);
        cache.insert(sig(256), c);
        let poisoner = Arc::clone(&cache);
        let result = thread::spawn(move || {
            let _guard = poisoner.entries.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(result.is_err());
        assert!(cache.entries.is_poisoned());

        assert_eq!(cache.get(&sig(256)), Some(c));
        cache.insert(sig(512), c);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_global_is_shared() {
        let a = global();
        let b = global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
