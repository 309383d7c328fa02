//! Storage tiers for picvault.
//!
//! This crate provides:
//! - The local blob store: a flat directory of image files with atomic writes
//! - The remote archive abstraction and its S3-compatible backend (S3, MinIO, R2)

pub mod backends;
pub mod error;
pub mod local;
pub mod remote;

pub use backends::s3::S3Archive;
pub use error::{StorageError, StorageResult};
pub use local::{LocalBlobStore, LocalEntry};
pub use remote::RemoteArchive;

use picvault_core::config::{LocalConfig, RemoteConfig};
use std::sync::Arc;

/// Open the local blob store from configuration.
pub async fn local_from_config(config: &LocalConfig) -> StorageResult<LocalBlobStore> {
    LocalBlobStore::new(&config.path).await
}

/// Create the remote archive from configuration. Returns `None` when the
/// remote tier is disabled.
pub async fn remote_from_config(
    config: &RemoteConfig,
) -> StorageResult<Option<Arc<dyn RemoteArchive>>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        RemoteConfig::Disabled => Ok(None),
        RemoteConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let archive = S3Archive::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Some(Arc::new(archive)))
        }
        RemoteConfig::R2 {
            account_id,
            bucket,
            prefix,
            access_key_id,
            secret_access_key,
        } => {
            let archive = S3Archive::r2(
                account_id,
                bucket,
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
            )
            .await?;
            Ok(Some(Arc::new(archive)))
        }
    }
}
