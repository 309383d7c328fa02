//! Filesystem-backed hot tier.

use crate::error::{StorageError, StorageResult};
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Prefix of in-flight temp files. Keys may not start with '.', so these
/// never collide with stored objects.
const TEMP_PREFIX: &str = ".tmp.";

/// Maximum key length (common filesystem name limit).
const MAX_KEY_LEN: usize = 255;

/// A file found by [`LocalBlobStore::scan`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalEntry {
    pub key: String,
    pub size: u64,
}

/// Flat directory of image files keyed by object key.
///
/// Writes are atomic: data goes to a temp file that is fsynced and then
/// renamed into place, so readers never observe a partially written image.
#[derive(Debug)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Open the store, creating the root directory and removing temp files
    /// left behind by an interrupted process.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        let store = Self { root };
        let removed = store.remove_stale_temp_files().await?;
        if removed > 0 {
            tracing::info!(removed, root = %store.root.display(), "Removed stale temp files");
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to its path, rejecting anything that is not a plain
    /// file name directly under the root.
    fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(StorageError::InvalidKey(format!(
                "key length must be between 1 and {MAX_KEY_LEN}: {key:?}"
            )));
        }
        if key.starts_with('.') || key.contains('/') || key.contains('\\') {
            return Err(StorageError::InvalidKey(format!(
                "key must be a plain file name: {key}"
            )));
        }
        let mut components = Path::new(key).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(key)),
            _ => Err(StorageError::InvalidKey(format!(
                "contains unsafe path component: {key}"
            ))),
        }
    }

    /// Refuse to follow a symlink planted in the store directory.
    async fn reject_symlink(path: &Path, key: &str) -> StorageResult<()> {
        match fs::symlink_metadata(path).await {
            Ok(meta) if meta.file_type().is_symlink() => Err(StorageError::InvalidKey(format!(
                "refusing to follow symlink: {key}"
            ))),
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Write an object atomically. Returns the number of bytes written.
    #[instrument(skip(self, data), fields(backend = "local", size = data.len()))]
    pub async fn put(&self, key: &str, data: Bytes) -> StorageResult<u64> {
        let path = self.key_path(key)?;
        Self::reject_symlink(&path, key).await?;

        let temp_path = self
            .root
            .join(format!("{TEMP_PREFIX}{}.{key}", Uuid::new_v4()));
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            // Data must be on disk before the rename publishes it.
            file.sync_all().await?;
            fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&temp_path).await
                && cleanup.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(error = %cleanup, path = %temp_path.display(), "Failed to remove temp file");
            }
            return Err(StorageError::Io(e));
        }

        Ok(data.len() as u64)
    }

    #[instrument(skip(self), fields(backend = "local"))]
    pub async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_path(key)?;
        Self::reject_symlink(&path, key).await?;
        let data = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(Bytes::from(data))
    }

    /// Delete an object. Returns `false` if it did not exist.
    #[instrument(skip(self), fields(backend = "local"))]
    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "local"))]
    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key)?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    /// List every stored object with its on-disk size.
    ///
    /// This walks the whole directory; it is meant for reconciliation, not
    /// for the request path.
    #[instrument(skip(self), fields(backend = "local"))]
    pub async fn scan(&self) -> StorageResult<Vec<LocalEntry>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            // file_type() does not follow symlinks, so planted links are skipped.
            let file_type = entry.file_type().await?;
            if !file_type.is_file() {
                continue;
            }
            let meta = entry.metadata().await?;
            found.push(LocalEntry {
                key: name,
                size: meta.len(),
            });
        }
        found.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(found)
    }

    async fn remove_stale_temp_files(&self) -> StorageResult<u64> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX)
                && entry.file_type().await?.is_file()
            {
                fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    #[instrument(skip(self), fields(backend = "local"))]
    pub async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("local store root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("local store root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}
