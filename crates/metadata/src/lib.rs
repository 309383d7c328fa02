//! Image lifecycle metadata for picvault.
//!
//! This crate tracks, per image:
//! - Which tiers (local disk, remote archive) hold the bytes
//! - Archival upload state and retry schedule
//! - Creation and access timestamps used by eviction
//!
//! It also persists the runtime-editable cache policy.

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{ImageFilter, ImageOrder, ImageRecord, ImageStats, StoredPolicy};
pub use store::{MetadataStore, SqliteStore};

use picvault_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            busy_timeout_secs,
        } => {
            tracing::info!(path = %path.display(), "Opening SQLite metadata store");
            let store = SqliteStore::new(path, *busy_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
