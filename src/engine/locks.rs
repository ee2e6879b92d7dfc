use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

const MIN_PRUNE_THRESHOLD: usize = 64;

struct Entries<K, L> {
    map: HashMap<K, Weak<L>>,
    prune_at: usize,
}

/// Lazily created lock per key. Callers hold the returned `Arc` for as long
/// as they hold the lock; entries nobody holds are pruned as the table grows.
pub struct LockTable<K, L> {
    entries: Mutex<Entries<K, L>>,
}

impl<K, L> Default for LockTable<K, L> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                prune_at: MIN_PRUNE_THRESHOLD,
            }),
        }
    }
}

impl<K, L> LockTable<K, L>
where
    K: Eq + Hash + Clone,
    L: Default,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Entries<K, L>> {
        // The map holds only weak handles, so a panic elsewhere cannot leave it
        // half-updated.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &K) -> Arc<L> {
        let mut entries = self.entries();
        if let Some(lock) = entries.map.get(key).and_then(Weak::upgrade) {
            return lock;
        }

        let lock = Arc::new(L::default());
        entries.map.insert(key.clone(), Arc::downgrade(&lock));

        if entries.map.len() >= entries.prune_at {
            entries.map.retain(|_, handle| handle.strong_count() > 0);
            entries.prune_at = (entries.map.len() * 2).max(MIN_PRUNE_THRESHOLD);
        }
        lock
    }

    /// Number of keys whose lock is currently held by someone.
    #[cfg(test)]
    fn active(&self) -> usize {
        self.entries()
            .map
            .values()
            .filter(|handle| handle.strong_count() > 0)
            .count()
    }
}
