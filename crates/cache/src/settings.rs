//! Runtime-editable cache policy.
//!
//! The policy lives in the metadata store. Components take a snapshot at
//! the start of each operation or sweep, so an update never changes the
//! rules halfway through one.

use crate::error::{CacheError, CacheResult};
use picvault_core::config::CachePolicy;
use picvault_metadata::repos::SettingsRepo;
use picvault_metadata::{MetadataStore, StoredPolicy};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{Mutex, watch};

/// Shared handle to the current policy snapshot.
pub struct SettingsHandle {
    store: Arc<dyn MetadataStore>,
    current: watch::Sender<Arc<StoredPolicy>>,
    update_lock: Mutex<()>,
}

impl SettingsHandle {
    /// Load the persisted policy, seeding it from `seed` on first start.
    ///
    /// A stored policy always wins over the seed.
    pub async fn load(
        store: Arc<dyn MetadataStore>,
        seed: &CachePolicy,
        now: OffsetDateTime,
    ) -> CacheResult<Self> {
        let stored = match store.get_policy().await? {
            Some(stored) => {
                tracing::info!(version = stored.version, "Loaded persisted cache policy");
                if &stored.policy != seed {
                    tracing::info!("Persisted cache policy differs from config file; using persisted policy");
                }
                stored
            }
            None => {
                seed.validate().map_err(CacheError::InvalidInput)?;
                let stored = store.save_policy(seed, now).await?;
                tracing::info!(version = stored.version, "Seeded cache policy from config");
                stored
            }
        };

        let (current, _) = watch::channel(Arc::new(stored));
        Ok(Self {
            store,
            current,
            update_lock: Mutex::new(()),
        })
    }

    /// The policy in force right now.
    pub fn snapshot(&self) -> Arc<StoredPolicy> {
        self.current.borrow().clone()
    }

    /// Be notified of policy changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<StoredPolicy>> {
        self.current.subscribe()
    }

    /// Validate, persist, then publish a new policy.
    pub async fn update(
        &self,
        policy: CachePolicy,
        now: OffsetDateTime,
    ) -> CacheResult<Arc<StoredPolicy>> {
        policy.validate().map_err(CacheError::InvalidInput)?;

        // Serialize so the published version order matches the stored one.
        let _guard = self.update_lock.lock().await;
        let stored = Arc::new(self.store.save_policy(&policy, now).await?);
        self.current.send_replace(stored.clone());

        tracing::info!(version = stored.version, "Cache policy updated");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use picvault_metadata::SqliteStore;
    use time::macros::datetime;

    async fn store() -> (Arc<dyn MetadataStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("m.db"), 5).await.unwrap();
        (Arc::new(store), dir)
    }

    #[tokio::test]
    async fn test_seed_is_persisted_once() {
        let (store, _dir) = store().await;
        let now = datetime!(2024-01-01 0:00 UTC);

        let handle = SettingsHandle::load(store.clone(), &CachePolicy::default(), now)
            .await
            .unwrap();
        assert_eq!(handle.snapshot().version, 1);

        let other_seed = CachePolicy {
            local_ttl_hours: 1,
            ..CachePolicy::default()
        };
        let reloaded = SettingsHandle::load(store, &other_seed, now).await.unwrap();
        assert_eq!(reloaded.snapshot().version, 1);
        assert_eq!(reloaded.snapshot().policy, CachePolicy::default());
    }

    #[tokio::test]
    async fn test_update_publishes_new_version() {
        let (store, _dir) = store().await;
        let now = datetime!(2024-01-01 0:00 UTC);
        let handle = SettingsHandle::load(store, &CachePolicy::default(), now)
            .await
            .unwrap();
        let mut rx = handle.subscribe();

        let policy = CachePolicy {
            max_local_bytes: 4096,
            ..CachePolicy::default()
        };
        let stored = handle.update(policy.clone(), now).await.unwrap();

        assert_eq!(stored.version, 2);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().policy, policy);
        assert_eq!(handle.snapshot().policy.max_local_bytes, 4096);
    }

    #[tokio::test]
    async fn test_invalid_update_is_rejected() {
        let (store, _dir) = store().await;
        let now = datetime!(2024-01-01 0:00 UTC);
        let handle = SettingsHandle::load(store, &CachePolicy::default(), now)
            .await
            .unwrap();

        let bad = CachePolicy {
            local_ttl_hours: 0,
            ..CachePolicy::default()
        };
        let err = handle.update(bad, now).await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidInput(_)));
        assert_eq!(handle.snapshot().version, 1);
    }
}
