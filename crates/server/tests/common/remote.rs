//! In-memory remote archive.

use async_trait::async_trait;
use bytes::Bytes;
use picvault_storage::{RemoteArchive, StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Remote archive backed by a map, with a switch to make every call fail.
#[derive(Default)]
pub struct MemoryArchive {
    objects: Mutex<HashMap<String, Bytes>>,
    unavailable: AtomicBool,
}

#[allow(dead_code)]
impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a transient error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    fn check(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Transient("archive unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteArchive for MemoryArchive {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        self.check()?;
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.check()?;
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.check()?;
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.check()?;
        Ok(self.contains(key))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
