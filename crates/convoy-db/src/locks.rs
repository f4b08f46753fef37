//! Per-entity mutual exclusion keyed by record id.

use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Lazily created lock per id.
///
/// Callers must re-load the record after acquiring its lock; the copy read
/// before the lock may already be stale. No caller holds two ids at once.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock handle for `id`, created on first use.
    pub fn handle(&self, id: &str) -> Arc<Mutex<()>> {
        // Clone out of the map so the shard guard is released before locking.
        let entry = self.locks.entry(id.to_string()).or_default();
        Arc::clone(entry.value())
    }

    /// Run `f` while holding the lock for `id`.
    pub fn with_lock<T>(&self, id: &str, f: impl FnOnce() -> T) -> T {
        let handle = self.handle(id);
        let _guard = handle.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::trace!(id, "entity lock acquired");
        f()
    }
}
