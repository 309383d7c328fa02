//! Persisted cache policy.

use crate::error::MetadataResult;
use crate::models::StoredPolicy;
use async_trait::async_trait;
use picvault_core::config::CachePolicy;
use time::OffsetDateTime;

/// Repository for the runtime-editable cache policy.
#[async_trait]
pub trait SettingsRepo: Send + Sync {
    /// The current policy, if one has been saved.
    async fn get_policy(&self) -> MetadataResult<Option<StoredPolicy>>;

    /// Save a policy, bumping the version. Returns the stored snapshot.
    async fn save_policy(
        &self,
        policy: &CachePolicy,
        at: OffsetDateTime,
    ) -> MetadataResult<StoredPolicy>;
}
