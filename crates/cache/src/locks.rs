//! Per-image mutual exclusion.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-id async locks.
///
/// Entries exist only while someone holds or waits for the lock, so the map
/// does not grow with the number of images ever touched.
#[derive(Debug, Clone, Default)]
pub struct KeyLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let mutex = self.entry(key);
        let guard = mutex.lock_owned().await;
        self.guard(key, guard)
    }

    /// Take the lock only if nobody holds it.
    pub fn try_lock(&self, key: &str) -> Option<KeyGuard> {
        let mutex = self.entry(key);
        match mutex.try_lock_owned() {
            Ok(guard) => Some(self.guard(key, guard)),
            Err(_) => {
                self.cleanup(key);
                None
            }
        }
    }

    /// Number of ids currently locked or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn entry(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn guard(&self, key: &str, guard: OwnedMutexGuard<()>) -> KeyGuard {
        KeyGuard {
            locks: self.clone(),
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    fn cleanup(&self, key: &str) {
        // Only the map's own reference left: nobody holds or waits.
        self.locks
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Held lock on one id. Released on drop.
#[derive(Debug)]
pub struct KeyGuard {
    locks: KeyLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.cleanup(&self.key);
    }
}
