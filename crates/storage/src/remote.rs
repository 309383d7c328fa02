//! Remote archive abstraction.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;

/// Durable cold tier holding archived images.
///
/// Implementations must report failures as [`StorageError::Transient`] when a
/// retry may succeed and [`StorageError::Fatal`] otherwise, and
/// [`StorageError::NotFound`] for missing objects.
///
/// [`StorageError::Transient`]: crate::StorageError::Transient
/// [`StorageError::Fatal`]: crate::StorageError::Fatal
/// [`StorageError::NotFound`]: crate::StorageError::NotFound
#[async_trait]
pub trait RemoteArchive: Send + Sync + 'static {
    /// Store an object, replacing any existing object with the same key.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    /// Fetch an object.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Check whether an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Backend name for logs and metrics.
    fn backend_name(&self) -> &'static str;

    /// Verify the archive is reachable and writable.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
