//! Per-resource async locks

use ephemera_util::ResourceId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OwnedMutexGuard;

/// One async mutex per resource id, created on demand.
///
/// Operations on different ids never contend. Entries are dropped from the
/// map once no guard or waiter refers to them, so the map stays as small as
/// the set of ids currently being worked on.
///
/// The locks are not reentrant: code already holding a guard for an id must
/// not call anything that locks the same id again.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<ResourceId, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`
    pub async fn lock(&self, id: &ResourceId) -> KeyedGuard<'_> {
        let mutex = self.map().entry(id.clone()).or_default().clone();
        let guard = mutex.lock_owned().await;

        KeyedGuard {
            locks: self,
            id: id.clone(),
            guard: Some(guard),
        }
    }

    /// Number of ids with a live guard or waiter
    pub fn active(&self) -> usize {
        self.map().len()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<ResourceId, Arc<tokio::sync::Mutex<()>>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive access to one resource id; released on drop
#[derive(Debug)]
pub struct KeyedGuard<'a> {
    locks: &'a KeyedLocks,
    id: ResourceId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        // Release first so the map holds the last reference when idle
        self.guard.take();

        let mut map = self.locks.map();
        let idle = map
            .get(&self.id)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1);
        if idle {
            map.remove(&self.id);
        }
    }
}
