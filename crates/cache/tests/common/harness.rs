use super::remote::MockArchive;
use picvault_cache::archive::ArchiveReceiver;
use picvault_cache::{CacheController, CacheParts, Clock, ManualClock, SettingsHandle};
use picvault_core::ImageId;
use picvault_core::config::{CachePolicy, TimeoutConfig};
use picvault_metadata::repos::ImageRepo;
use picvault_metadata::{ImageRecord, MetadataStore, SqliteStore};
use picvault_storage::{LocalBlobStore, RemoteArchive};
use std::sync::Arc;
use tempfile::TempDir;
use time::OffsetDateTime;
use time::macros::datetime;

/// A cache controller over a temp directory, a SQLite file, a manual clock
/// and (optionally) an in-memory remote archive.
#[allow(dead_code)]
pub struct TestCache {
    pub controller: CacheController,
    pub receiver: Option<ArchiveReceiver>,
    pub remote: Option<Arc<MockArchive>>,
    pub clock: Arc<ManualClock>,
    pub local: Arc<LocalBlobStore>,
    pub metadata: Arc<dyn MetadataStore>,
    _dir: TempDir,
}

#[allow(dead_code)]
impl TestCache {
    /// With a remote archive.
    pub async fn new(policy: CachePolicy) -> Self {
        Self::build(policy, Some(Arc::new(MockArchive::new())), 64).await
    }

    /// Without a remote archive.
    pub async fn local_only(policy: CachePolicy) -> Self {
        Self::build(policy, None, 64).await
    }

    pub async fn build(
        policy: CachePolicy,
        remote: Option<Arc<MockArchive>>,
        queue_capacity: usize,
    ) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let local = Arc::new(
            LocalBlobStore::new(dir.path().join("images"))
                .await
                .expect("failed to open local store"),
        );
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(dir.path().join("meta.db"), 5)
                .await
                .expect("failed to open metadata store"),
        );
        let clock = Arc::new(ManualClock::new(datetime!(2026-03-01 12:00 UTC)));
        let settings = Arc::new(
            SettingsHandle::load(metadata.clone(), &policy, clock.now())
                .await
                .expect("failed to load settings"),
        );

        let parts = CacheParts {
            metadata: metadata.clone(),
            local: local.clone(),
            remote: remote
                .clone()
                .map(|r| r as Arc<dyn RemoteArchive>),
            settings,
            timeouts: TimeoutConfig {
                local_io_secs: 5,
                remote_secs: 1,
            },
            batch_size: 2,
            clock: clock.clone(),
        };
        let (controller, receiver) = CacheController::new(parts, queue_capacity);

        Self {
            controller,
            receiver,
            remote,
            clock,
            local,
            metadata,
            _dir: dir,
        }
    }

    pub fn clock_now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    pub fn remote(&self) -> &MockArchive {
        self.remote.as_deref().expect("test cache has no remote")
    }

    pub async fn record(&self, id: &str) -> Option<ImageRecord> {
        self.metadata
            .get_image(&ImageId::parse(id).unwrap())
            .await
            .expect("metadata read failed")
    }

    pub async fn file_exists(&self, record: &ImageRecord) -> bool {
        self.local.exists(&record.object_key()).await.unwrap()
    }

    /// Archive `id` inline and assert it succeeded.
    pub async fn archive(&self, id: &str) {
        let outcome = self
            .controller
            .archive_now(&ImageId::parse(id).unwrap())
            .await
            .expect("archive failed");
        assert_eq!(outcome, picvault_cache::ArchiveOutcome::Archived, "archiving {id}");
    }
}
