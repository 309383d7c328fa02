//! Cache controller: write-through puts, tiered reads and deletes.
//!
//! Every mutation of one image's record or files happens under that image's
//! lock. The write-then-insert critical sections run in their own task so a
//! caller that goes away cannot leave a file without a record, or a record
//! without a file.

use crate::accounting::{Reservation, UsageAccountant};
use crate::archive::{ArchiveQueue, ArchiveReceiver, archive_channel};
use crate::clock::Clock;
use crate::error::{CacheError, CacheResult};
use crate::locks::KeyLocks;
use crate::metrics;
use crate::settings::SettingsHandle;
use bytes::Bytes;
use picvault_core::config::{CachePolicy, TimeoutConfig};
use picvault_core::image::normalize_content_type;
use picvault_core::{Checksum, DeleteScope, ImageId, decode_base64_image};
use picvault_metadata::models::{ImageFilter, ImageOrder};
use picvault_metadata::repos::ImageRepo;
use picvault_metadata::{ImageRecord, ImageStats, MetadataStore, StoredPolicy};
use picvault_storage::{LocalBlobStore, RemoteArchive};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Collaborators the controller is built from.
pub struct CacheParts {
    pub metadata: Arc<dyn MetadataStore>,
    pub local: Arc<LocalBlobStore>,
    /// `None` when the remote tier is disabled.
    pub remote: Option<Arc<dyn RemoteArchive>>,
    pub settings: Arc<SettingsHandle>,
    pub timeouts: TimeoutConfig,
    /// Records examined per metadata page during sweeps and scans.
    pub batch_size: u32,
    pub clock: Arc<dyn Clock>,
}

/// Entry point for all cache operations. Cheap to clone.
#[derive(Clone)]
pub struct CacheController {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) metadata: Arc<dyn MetadataStore>,
    pub(crate) local: Arc<LocalBlobStore>,
    pub(crate) remote: Option<Arc<dyn RemoteArchive>>,
    pub(crate) settings: Arc<SettingsHandle>,
    pub(crate) usage: Arc<UsageAccountant>,
    /// Held shared while a `local_present` change and the matching counter
    /// adjustment are applied; reconcile holds it exclusively to recount.
    pub(crate) recount: RwLock<()>,
    pub(crate) locks: KeyLocks,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) timeouts: TimeoutConfig,
    pub(crate) batch_size: u32,
    pub(crate) queue: Option<ArchiveQueue>,
    pub(crate) sweeps: SweepLocks,
}

/// One lock per sweep type; a second trigger waits for the running sweep.
#[derive(Default)]
pub(crate) struct SweepLocks {
    pub(crate) ttl: Arc<Mutex<()>>,
    pub(crate) size: Arc<Mutex<()>>,
    pub(crate) metadata: Arc<Mutex<()>>,
}

/// Tier that served a read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Local,
    Remote,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Local => "local",
            Tier::Remote => "remote",
        }
    }
}

/// Bytes returned by [`CacheController::get`].
#[derive(Clone, Debug)]
pub struct CachedImage {
    pub id: ImageId,
    pub bytes: Bytes,
    pub content_type: String,
    pub tier: Tier,
}

/// What a delete actually removed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub existed: bool,
    pub local_removed: bool,
    pub remote_removed: bool,
    pub record_removed: bool,
}

/// Read-only cache statistics.
#[derive(Clone, Debug, Serialize)]
pub struct CacheStats {
    #[serde(flatten)]
    pub images: ImageStats,
    /// Bytes held by the usage counter, including in-flight writes.
    pub usage_bytes: u64,
    pub max_local_bytes: Option<u64>,
    pub archive_queue_depth: usize,
    pub remote_enabled: bool,
    pub policy_version: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    /// Failed records moved back to pending.
    pub reset: u64,
    /// Of those, how many made it into the archive queue right away.
    pub enqueued: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub files_scanned: u64,
    pub orphan_files_removed: u64,
    pub missing_files_cleared: u64,
    pub usage_before: u64,
    pub usage_after: u64,
    pub errors: u64,
}

/// Bound a storage call by `limit`.
pub(crate) async fn bounded<F: Future>(
    limit: Duration,
    what: &str,
    fut: F,
) -> CacheResult<F::Output> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| CacheError::Timeout(what.to_string()))
}

impl CacheController {
    /// Build a controller. Returns the archive queue's receiving end when the
    /// remote tier is enabled; hand it to an `ArchivePool`.
    pub fn new(parts: CacheParts, queue_capacity: usize) -> (Self, Option<ArchiveReceiver>) {
        let (queue, receiver) = match parts.remote {
            Some(_) => {
                let (queue, receiver) = archive_channel(queue_capacity);
                (Some(queue), Some(receiver))
            }
            None => (None, None),
        };

        let inner = Inner {
            metadata: parts.metadata,
            local: parts.local,
            remote: parts.remote,
            settings: parts.settings,
            usage: Arc::new(UsageAccountant::new(0)),
            recount: RwLock::new(()),
            locks: KeyLocks::new(),
            clock: parts.clock,
            timeouts: parts.timeouts,
            batch_size: parts.batch_size.max(1),
            queue,
            sweeps: SweepLocks::default(),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            receiver,
        )
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.inner.metadata
    }

    pub fn local(&self) -> &Arc<LocalBlobStore> {
        &self.inner.local
    }

    pub fn remote_enabled(&self) -> bool {
        self.inner.remote.is_some()
    }

    pub fn settings(&self) -> &Arc<SettingsHandle> {
        &self.inner.settings
    }

    /// Current policy snapshot.
    pub fn policy(&self) -> Arc<StoredPolicy> {
        self.inner.settings.snapshot()
    }

    /// Validate, persist and publish a new cache policy.
    pub async fn update_policy(&self, policy: CachePolicy) -> CacheResult<Arc<StoredPolicy>> {
        self.inner
            .settings
            .update(policy, self.inner.clock.now())
            .await
    }

    /// Bytes currently accounted to the local tier.
    pub fn usage_bytes(&self) -> u64 {
        self.inner.usage.current()
    }

    /// Check the metadata store and the local tier.
    pub async fn health_check(&self) -> CacheResult<()> {
        self.inner.metadata.health_check().await?;
        self.inner
            .local
            .health_check()
            .await
            .map_err(|e| CacheError::ReadError(e.to_string()))
    }

    /// Look up an image's record. Tierless records are reported as missing.
    pub async fn record(&self, id: &str) -> CacheResult<ImageRecord> {
        let id = ImageId::parse(id)?;
        match self.inner.metadata.get_image(&id).await? {
            Some(record) if !record.is_tierless() => Ok(record),
            _ => Err(CacheError::NotFound(id.to_string())),
        }
    }

    // =========================================================================
    // Put
    // =========================================================================

    /// Store a new image locally and queue it for archival.
    #[tracing::instrument(skip(self, bytes), fields(image_id = %id, bytes = bytes.len()))]
    pub async fn put(&self, id: &str, bytes: Bytes, content_type: &str) -> CacheResult<ImageRecord> {
        let id = ImageId::parse(id)?;
        let content_type = normalize_content_type(content_type)?;
        if bytes.is_empty() {
            return Err(CacheError::InvalidInput("image is empty".to_string()));
        }

        let guard = self.inner.locks.lock(id.as_str()).await;
        // Ids of deleted or purged images are never handed out again.
        if self.inner.metadata.id_taken(&id).await? {
            return Err(CacheError::AlreadyExists(id.to_string()));
        }

        let stored = self.inner.settings.snapshot();
        let size = bytes.len() as u64;
        let reservation = self.reserve(size, &stored).await?;
        let record = ImageRecord::new(
            id,
            content_type,
            size,
            Checksum::compute(&bytes),
            self.inner.clock.now(),
        );

        let this = self.clone();
        let record = tokio::spawn(async move {
            let _guard = guard;
            this.write_and_insert(record, bytes, reservation).await
        })
        .await
        .map_err(|e| CacheError::WriteError(format!("write task failed: {e}")))??;

        metrics::IMAGES_STORED.inc();
        metrics::BYTES_STORED.inc_by(size);
        tracing::debug!(content_type = %record.content_type, "Image stored locally");

        self.enqueue(&record.id);
        if let Some(limit) = stored.policy.size_limit()
            && self.inner.usage.current() > limit
        {
            self.trigger_size_sweep();
        }
        Ok(record)
    }

    /// Decode a base64 payload (optionally a `data:` URL) and store it under a
    /// freshly generated id.
    pub async fn put_base64(
        &self,
        payload: &str,
        content_type_hint: Option<&str>,
    ) -> CacheResult<ImageRecord> {
        let image = decode_base64_image(payload, content_type_hint)?;
        let id = ImageId::generate();
        self.put(id.as_str(), Bytes::from(image.bytes), &image.content_type)
            .await
    }

    /// Reserve space for a write, running one eviction pass if needed.
    async fn reserve(&self, size: u64, stored: &StoredPolicy) -> CacheResult<Reservation> {
        let limit = stored.policy.size_limit();
        let used = match self.inner.usage.try_reserve(size, limit) {
            Ok(reservation) => return Ok(reservation),
            Err(used) => used,
        };
        let Some(limit) = limit else {
            return Err(CacheError::StorageFull {
                needed: size,
                limit: u64::MAX,
                used,
            });
        };
        if size > limit {
            return Err(CacheError::StorageFull {
                needed: size,
                limit,
                used,
            });
        }

        tracing::info!(needed = size, used, limit, "Local tier full, running eviction pass");
        {
            let _running = self.inner.sweeps.size.lock().await;
            let report = self.evict_to_target(limit - size, stored).await?;
            tracing::debug!(
                removed = report.removed,
                bytes_reclaimed = report.bytes_reclaimed,
                "Inline eviction pass finished"
            );
        }

        self.inner
            .usage
            .try_reserve(size, Some(limit))
            .map_err(|used| CacheError::StorageFull {
                needed: size,
                limit,
                used,
            })
    }

    async fn write_and_insert(
        &self,
        record: ImageRecord,
        bytes: Bytes,
        reservation: Reservation,
    ) -> CacheResult<ImageRecord> {
        let key = record.object_key();
        match bounded(
            self.inner.timeouts.local_io(),
            "local write",
            self.inner.local.put(&key, bytes),
        )
        .await
        {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(CacheError::WriteError(e.to_string())),
            Err(timeout) => {
                self.remove_local_file(&key).await;
                return Err(timeout);
            }
        }

        let _counted = self.inner.recount.read().await;
        if let Err(e) = self.inner.metadata.insert_image(&record).await {
            tracing::warn!(image_id = %record.id, error = %e, "Metadata insert failed, removing written file");
            self.remove_local_file(&key).await;
            return Err(e.into());
        }

        reservation.commit();
        Ok(record)
    }

    // =========================================================================
    // Get
    // =========================================================================

    /// Read an image, local tier first, remote as fallback.
    ///
    /// A remote failure is reported as `NotFound`: a transient miss, not a
    /// guarantee that the image is gone.
    #[tracing::instrument(skip(self), fields(image_id = %id))]
    pub async fn get(&self, id: &str) -> CacheResult<CachedImage> {
        let id = ImageId::parse(id)?;
        let Some(mut record) = self.inner.metadata.get_image(&id).await? else {
            metrics::CACHE_MISSES.inc();
            return Err(CacheError::NotFound(id.to_string()));
        };

        if record.local_present {
            let key = record.object_key();
            let read = bounded(
                self.inner.timeouts.local_io(),
                "local read",
                self.inner.local.get(&key),
            )
            .await;
            match read {
                Ok(Ok(bytes)) => {
                    self.touch(&id).await;
                    metrics::CACHE_HITS.with_label_values(&["local"]).inc();
                    return Ok(CachedImage {
                        id,
                        bytes,
                        content_type: record.content_type,
                        tier: Tier::Local,
                    });
                }
                Ok(Err(e)) if e.is_not_found() => match self.clear_drifted_local(&id).await? {
                    Some(current) => record = current,
                    None => {
                        metrics::CACHE_MISSES.inc();
                        return Err(CacheError::NotFound(id.to_string()));
                    }
                },
                Ok(Err(e)) => {
                    if !record.remote_present {
                        return Err(CacheError::ReadError(e.to_string()));
                    }
                    tracing::warn!(error = %e, "Local read failed, falling back to remote");
                }
                Err(timeout) => {
                    if !record.remote_present {
                        return Err(timeout);
                    }
                    tracing::warn!("Local read timed out, falling back to remote");
                }
            }
        }

        if record.remote_present
            && let Some(remote) = self.inner.remote.clone()
        {
            return self.read_remote(remote.as_ref(), record).await;
        }

        metrics::CACHE_MISSES.inc();
        Err(CacheError::NotFound(id.to_string()))
    }

    async fn read_remote(
        &self,
        remote: &dyn RemoteArchive,
        record: ImageRecord,
    ) -> CacheResult<CachedImage> {
        let key = record.object_key();
        let fetched = bounded(self.inner.timeouts.remote(), "remote read", remote.get(&key))
            .await
            .and_then(|res| res.map_err(CacheError::from_remote));
        let bytes = match fetched {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Remote fetch failed, reporting miss");
                metrics::CACHE_MISSES.inc();
                return Err(CacheError::NotFound(record.id.to_string()));
            }
        };

        if !record.checksum.matches(&bytes) {
            metrics::CHECKSUM_MISMATCHES.inc();
            metrics::CACHE_MISSES.inc();
            tracing::warn!(
                expected = %record.checksum,
                fetched_bytes = bytes.len(),
                "Remote bytes do not match stored checksum"
            );
            return Err(CacheError::NotFound(record.id.to_string()));
        }

        self.touch(&record.id).await;
        self.repopulate(&record.id, bytes.clone()).await;
        metrics::CACHE_HITS.with_label_values(&["remote"]).inc();
        Ok(CachedImage {
            id: record.id,
            bytes,
            content_type: record.content_type,
            tier: Tier::Remote,
        })
    }

    async fn touch(&self, id: &ImageId) {
        if let Err(e) = self
            .inner
            .metadata
            .touch_image(id, self.inner.clock.now())
            .await
        {
            tracing::warn!(image_id = %id, error = %e, "Failed to record access time");
        }
    }

    /// Best-effort copy of remote bytes back into the local tier.
    async fn repopulate(&self, id: &ImageId, bytes: Bytes) {
        let this = self.clone();
        let task_id = id.clone();
        let outcome =
            tokio::spawn(async move { this.repopulate_locked(&task_id, bytes).await }).await;
        let label = match outcome {
            Ok(Ok(true)) => "stored",
            Ok(Ok(false)) => "skipped",
            Ok(Err(e)) => {
                tracing::warn!(image_id = %id, error = %e, "Local repopulation failed");
                "failed"
            }
            Err(e) => {
                tracing::warn!(image_id = %id, error = %e, "Local repopulation task failed");
                "failed"
            }
        };
        metrics::REPOPULATIONS.with_label_values(&[label]).inc();
    }

    async fn repopulate_locked(&self, id: &ImageId, bytes: Bytes) -> CacheResult<bool> {
        let _guard = self.inner.locks.lock(id.as_str()).await;
        let Some(record) = self.inner.metadata.get_image(id).await? else {
            return Ok(false);
        };
        if record.local_present || !record.remote_present {
            return Ok(false);
        }

        let limit = self.inner.settings.snapshot().policy.size_limit();
        let Ok(reservation) = self.inner.usage.try_reserve(record.size_bytes, limit) else {
            tracing::debug!(image_id = %id, "No local room, serving from remote only");
            return Ok(false);
        };

        let key = record.object_key();
        match bounded(
            self.inner.timeouts.local_io(),
            "local write",
            self.inner.local.put(&key, bytes),
        )
        .await
        {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(CacheError::WriteError(e.to_string())),
            Err(timeout) => {
                self.remove_local_file(&key).await;
                return Err(timeout);
            }
        }

        let _counted = self.inner.recount.read().await;
        match self
            .inner
            .metadata
            .set_local_present(id, true, self.inner.clock.now())
            .await
        {
            Ok(true) => {
                reservation.commit();
                Ok(true)
            }
            Ok(false) => {
                self.remove_local_file(&key).await;
                Ok(false)
            }
            Err(e) => {
                self.remove_local_file(&key).await;
                Err(e.into())
            }
        }
    }

    /// The record says the file is local but it is gone. Clear the flag under
    /// the id lock and return the updated record.
    pub(crate) async fn clear_drifted_local(
        &self,
        id: &ImageId,
    ) -> CacheResult<Option<ImageRecord>> {
        let _guard = self.inner.locks.lock(id.as_str()).await;
        let Some(mut record) = self.inner.metadata.get_image(id).await? else {
            return Ok(None);
        };
        if !record.local_present {
            return Ok(Some(record));
        }

        tracing::warn!(image_id = %id, "Local file vanished, clearing local_present");
        let _counted = self.inner.recount.read().await;
        if self
            .inner
            .metadata
            .set_local_present(id, false, self.inner.clock.now())
            .await?
        {
            self.inner.usage.release(record.size_bytes);
        }
        record.local_present = false;
        Ok(Some(record))
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete one or both tiers; `All` also removes the record. Deleting a
    /// tier that holds nothing is a no-op.
    #[tracing::instrument(skip(self), fields(image_id = %id, scope = scope.as_str()))]
    pub async fn delete(&self, id: &str, scope: DeleteScope) -> CacheResult<DeleteReport> {
        let id = ImageId::parse(id)?;
        let _guard = self.inner.locks.lock(id.as_str()).await;
        let Some(record) = self.inner.metadata.get_image(&id).await? else {
            return Ok(DeleteReport::default());
        };
        let mut report = DeleteReport {
            existed: true,
            ..DeleteReport::default()
        };

        // Remote first: if it fails nothing has changed yet.
        if scope.includes_remote() && record.remote_present {
            let remote = self.inner.remote.as_ref().ok_or_else(|| {
                CacheError::RemoteFatal("remote archive is not configured".to_string())
            })?;
            bounded(
                self.inner.timeouts.remote(),
                "remote delete",
                remote.delete(&record.object_key()),
            )
            .await?
            .map_err(CacheError::from_remote)?;
            self.inner
                .metadata
                .clear_remote_present(&id, self.inner.clock.now())
                .await?;
            report.remote_removed = true;
        }

        if scope.includes_local() && record.local_present {
            report.local_removed = self.drop_local_copy(&record, "delete").await?;
        }

        if scope == DeleteScope::All {
            report.record_removed = self
                .inner
                .metadata
                .delete_image(&id, self.inner.clock.now())
                .await?;
        }

        tracing::info!(
            local_removed = report.local_removed,
            remote_removed = report.remote_removed,
            record_removed = report.record_removed,
            "Image deleted"
        );
        Ok(report)
    }

    /// Clear `local_present`, release the accounted bytes, then remove the
    /// file. The flag goes first so a record never claims a missing file.
    pub(crate) async fn drop_local_copy(
        &self,
        record: &ImageRecord,
        reason: &'static str,
    ) -> CacheResult<bool> {
        let counted = self.inner.recount.read().await;
        let cleared = self
            .inner
            .metadata
            .set_local_present(&record.id, false, self.inner.clock.now())
            .await?;
        if !cleared {
            return Ok(false);
        }
        self.inner.usage.release(record.size_bytes);
        drop(counted);
        self.remove_local_file(&record.object_key()).await;
        metrics::record_eviction(reason, record.size_bytes);
        Ok(true)
    }

    /// Remove a local file, logging failures. Leftovers are orphans that
    /// reconciliation removes.
    pub(crate) async fn remove_local_file(&self, key: &str) {
        let removed = bounded(
            self.inner.timeouts.local_io(),
            "local delete",
            self.inner.local.delete(key),
        )
        .await
        .and_then(|res| res.map_err(|e| CacheError::WriteError(e.to_string())));
        if let Err(e) = removed {
            tracing::warn!(key, error = %e, "Failed to remove local file");
        }
    }

    // =========================================================================
    // Admin
    // =========================================================================

    pub async fn stats(&self) -> CacheResult<CacheStats> {
        let images = self.inner.metadata.image_stats().await?;
        let stored = self.inner.settings.snapshot();
        Ok(CacheStats {
            images,
            usage_bytes: self.inner.usage.current(),
            max_local_bytes: stored.policy.size_limit(),
            archive_queue_depth: self.inner.queue.as_ref().map_or(0, ArchiveQueue::len),
            remote_enabled: self.remote_enabled(),
            policy_version: stored.version,
        })
    }

    /// Manual retry: every failed record with a local copy goes back to
    /// pending and is queued for archival.
    pub async fn retry_failed_uploads(&self) -> CacheResult<RetryReport> {
        let ids = self
            .inner
            .metadata
            .reset_failed_uploads(self.inner.clock.now())
            .await?;
        let mut report = RetryReport {
            reset: ids.len() as u64,
            enqueued: 0,
        };
        for id in &ids {
            if self.enqueue(id) {
                report.enqueued += 1;
            }
        }
        tracing::info!(
            reset = report.reset,
            enqueued = report.enqueued,
            "Failed uploads reset for retry"
        );
        Ok(report)
    }

    /// Bring the local directory, the records and the usage counter back
    /// into agreement.
    pub async fn reconcile(&self) -> CacheResult<ReconcileReport> {
        let mut report = ReconcileReport {
            usage_before: self.inner.usage.current(),
            ..ReconcileReport::default()
        };

        let entries = self
            .inner
            .local
            .scan()
            .await
            .map_err(|e| CacheError::ReadError(e.to_string()))?;
        for entry in entries {
            report.files_scanned += 1;
            match self.reconcile_file(&entry.key).await {
                Ok(true) => report.orphan_files_removed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(key = %entry.key, error = %e, "Failed to reconcile local file");
                    report.errors += 1;
                }
            }
        }

        let mut offset = 0;
        loop {
            let page = self
                .inner
                .metadata
                .list_images(&ImageFilter {
                    local_present: Some(true),
                    order: ImageOrder::CreatedAsc,
                    limit: Some(self.inner.batch_size),
                    offset,
                    ..ImageFilter::default()
                })
                .await?;
            if page.is_empty() {
                break;
            }
            for record in page {
                let exists = matches!(
                    bounded(
                        self.inner.timeouts.local_io(),
                        "local stat",
                        self.inner.local.exists(&record.object_key()),
                    )
                    .await,
                    Ok(Ok(true))
                );
                if exists {
                    offset += 1;
                    continue;
                }
                match self.clear_drifted_local(&record.id).await {
                    Ok(_) => report.missing_files_cleared += 1,
                    Err(e) => {
                        tracing::warn!(image_id = %record.id, error = %e, "Failed to clear missing local copy");
                        report.errors += 1;
                        offset += 1;
                    }
                }
            }
        }

        {
            // Writes still holding a reservation have no local record yet, so
            // the recount only replaces the committed part.
            let _recount = self.inner.recount.write().await;
            let stats = self.inner.metadata.image_stats().await?;
            self.inner.usage.reset(stats.local_bytes);
        }
        report.usage_after = self.inner.usage.current();

        tracing::info!(
            files_scanned = report.files_scanned,
            orphan_files_removed = report.orphan_files_removed,
            missing_files_cleared = report.missing_files_cleared,
            usage_before = report.usage_before,
            usage_after = report.usage_after,
            "Local tier reconciled"
        );
        Ok(report)
    }

    /// Remove `key` if no record claims it. Returns whether it was removed.
    async fn reconcile_file(&self, key: &str) -> CacheResult<bool> {
        let id_part = key.split_once('.').map_or(key, |(id, _)| id);
        let Ok(id) = ImageId::parse(id_part) else {
            tracing::warn!(key, "Removing unrecognised file from local tier");
            self.remove_local_file(key).await;
            return Ok(true);
        };

        let _guard = self.inner.locks.lock(id.as_str()).await;
        let claimed = match self.inner.metadata.get_image(&id).await? {
            Some(record) => record.local_present && record.object_key() == key,
            None => false,
        };
        if claimed {
            return Ok(false);
        }
        tracing::info!(key, "Removing orphaned local file");
        self.remove_local_file(key).await;
        Ok(true)
    }

    /// Queue an id for archival. Returns `false` if it could not be queued;
    /// the record then stays pending for the periodic rescan.
    pub(crate) fn enqueue(&self, id: &ImageId) -> bool {
        match &self.inner.queue {
            Some(queue) => {
                let queued = queue.enqueue(id.clone());
                if !queued {
                    tracing::debug!(image_id = %id, "Archive queue full, leaving record pending");
                }
                queued
            }
            None => false,
        }
    }
}
