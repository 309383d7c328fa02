//! Archive worker pool.
//!
//! Jobs are image ids. A job claims its record (`pending -> in_progress`)
//! under the id lock, uploads the local bytes, and records the outcome. Retry
//! state lives in the metadata store, so the in-memory queue is only a
//! delivery mechanism: anything that falls out of it is found again by the
//! periodic rescan.

use crate::controller::{CacheController, bounded};
use crate::error::{CacheError, CacheResult};
use crate::metrics;
use dashmap::DashSet;
use picvault_core::config::{ArchiveConfig, CachePolicy};
use picvault_core::{ImageId, UploadStatus};
use picvault_metadata::ImageRecord;
use picvault_metadata::models::{ImageFilter, ImageOrder, truncate_millis};
use picvault_metadata::repos::ImageRepo;
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Create a bounded, de-duplicating archive queue.
pub fn archive_channel(capacity: usize) -> (ArchiveQueue, ArchiveReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let queued = Arc::new(DashSet::new());
    (
        ArchiveQueue {
            tx,
            queued: queued.clone(),
        },
        ArchiveReceiver { rx, queued },
    )
}

/// Sending half of the archive queue. An id is queued at most once.
#[derive(Clone, Debug)]
pub struct ArchiveQueue {
    tx: mpsc::Sender<ImageId>,
    queued: Arc<DashSet<ImageId>>,
}

impl ArchiveQueue {
    /// Queue an id without waiting. Returns `true` if the id is now queued
    /// (including when it already was), `false` if the queue is full or
    /// closed.
    pub fn enqueue(&self, id: ImageId) -> bool {
        if !self.queued.insert(id.clone()) {
            return true;
        }
        match self.tx.try_send(id) {
            Ok(()) => {
                metrics::ARCHIVE_QUEUE_DEPTH.inc();
                true
            }
            Err(TrySendError::Full(id) | TrySendError::Closed(id)) => {
                self.queued.remove(&id);
                false
            }
        }
    }

    /// Ids waiting for a worker.
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }
}

/// Receiving half of the archive queue.
#[derive(Debug)]
pub struct ArchiveReceiver {
    rx: mpsc::Receiver<ImageId>,
    queued: Arc<DashSet<ImageId>>,
}

impl ArchiveReceiver {
    pub async fn recv(&mut self) -> Option<ImageId> {
        let id = self.rx.recv().await?;
        // Released before processing so a retry can be queued mid-upload.
        self.queued.remove(&id);
        metrics::ARCHIVE_QUEUE_DEPTH.dec();
        Some(id)
    }
}

/// Result of one archive job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ArchiveOutcome {
    /// The remote copy is confirmed.
    Archived,
    /// The attempt failed; another is scheduled.
    RetryScheduled {
        attempts: u32,
        #[serde(with = "time::serde::rfc3339")]
        next_attempt_at: OffsetDateTime,
    },
    /// The attempt failed and no automatic retry will follow.
    Parked { attempts: u32, error: String },
    /// The record was not pending (already claimed, archived, or deleted).
    Skipped,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Interrupted uploads reset to pending.
    pub reset_in_progress: u64,
    pub enqueued: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Failed records whose retry time had come.
    pub due_retries: u64,
    pub enqueued: u64,
}

impl CacheController {
    /// Run one archive job inline.
    ///
    /// Returns `SourceMissing` (after parking the record) when the local
    /// copy disappeared before it could be uploaded.
    pub async fn archive_now(&self, id: &ImageId) -> CacheResult<ArchiveOutcome> {
        let Some(remote) = self.inner.remote.clone() else {
            return Err(CacheError::RemoteFatal(
                "remote archive is not configured".to_string(),
            ));
        };

        let _guard = self.inner.locks.lock(id.as_str()).await;
        let now = self.inner.clock.now();
        let Some(record) = self.inner.metadata.claim_upload(id, now).await? else {
            return Ok(ArchiveOutcome::Skipped);
        };
        let stored = self.inner.settings.snapshot();
        let attempts = record.upload_attempts + 1;
        let key = record.object_key();

        let read = bounded(
            self.inner.timeouts.local_io(),
            "local read",
            self.inner.local.get(&key),
        )
        .await;
        let bytes = match read {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) if e.is_not_found() => return self.park_source_missing(&record).await,
            Ok(Err(e)) => {
                let err = CacheError::ReadError(e.to_string());
                return self
                    .record_upload_failure(&record, attempts, err, &stored.policy)
                    .await;
            }
            Err(timeout) => {
                return self
                    .record_upload_failure(&record, attempts, timeout, &stored.policy)
                    .await;
            }
        };

        let uploaded = match bounded(
            self.inner.timeouts.remote(),
            "remote upload",
            remote.put(&key, bytes, &record.content_type),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CacheError::from_remote(e)),
            Err(timeout) => Err(timeout),
        };

        match uploaded {
            Ok(()) => {
                if !self
                    .inner
                    .metadata
                    .complete_upload(id, self.inner.clock.now())
                    .await?
                {
                    tracing::warn!(image_id = %id, "Upload finished but the claim was lost");
                }
                metrics::record_archive_outcome("done");
                tracing::info!(image_id = %id, attempt = attempts, bytes = record.size_bytes, "Image archived");
                Ok(ArchiveOutcome::Archived)
            }
            Err(err) => {
                self.record_upload_failure(&record, attempts, err, &stored.policy)
                    .await
            }
        }
    }

    async fn record_upload_failure(
        &self,
        record: &ImageRecord,
        attempts: u32,
        err: CacheError,
        policy: &CachePolicy,
    ) -> CacheResult<ArchiveOutcome> {
        let now = self.inner.clock.now();
        let retryable = err.is_transient() || matches!(err, CacheError::ReadError(_));
        let message = err.to_string();

        if retryable && policy.retry.should_retry(attempts) {
            let next_attempt_at = truncate_millis(now + policy.retry.delay_after(attempts));
            self.inner
                .metadata
                .fail_upload(&record.id, &message, Some(next_attempt_at), now)
                .await?;
            metrics::record_archive_outcome("retry_scheduled");
            tracing::warn!(
                image_id = %record.id,
                attempt = attempts,
                error = %err,
                next_attempt_at = %next_attempt_at,
                "Archive upload failed, retry scheduled"
            );
            return Ok(ArchiveOutcome::RetryScheduled {
                attempts,
                next_attempt_at,
            });
        }

        self.inner
            .metadata
            .fail_upload(&record.id, &message, None, now)
            .await?;
        metrics::record_archive_outcome("parked");
        if retryable {
            tracing::warn!(
                image_id = %record.id,
                attempt = attempts,
                error = %err,
                "Archive upload failed, retries exhausted; parked for manual retry"
            );
        } else {
            tracing::error!(
                image_id = %record.id,
                attempt = attempts,
                error = %err,
                "Archive upload rejected; parked for manual retry"
            );
        }
        Ok(ArchiveOutcome::Parked {
            attempts,
            error: message,
        })
    }

    async fn park_source_missing(&self, record: &ImageRecord) -> CacheResult<ArchiveOutcome> {
        let now = self.inner.clock.now();
        self.inner
            .metadata
            .fail_upload(
                &record.id,
                "source missing: local copy was removed before upload",
                None,
                now,
            )
            .await?;
        if record.local_present {
            let _counted = self.inner.recount.read().await;
            if self
                .inner
                .metadata
                .set_local_present(&record.id, false, now)
                .await?
            {
                self.inner.usage.release(record.size_bytes);
            }
        }
        metrics::record_archive_outcome("source_missing");
        tracing::error!(image_id = %record.id, "Archive source missing; job parked");
        Err(CacheError::SourceMissing(record.id.to_string()))
    }

    /// Crash recovery: reset interrupted uploads and queue every pending record.
    pub async fn recover_uploads(&self) -> CacheResult<RecoveryReport> {
        let reset_in_progress = self
            .inner
            .metadata
            .reset_in_progress_uploads(self.inner.clock.now())
            .await?;
        if reset_in_progress > 0 {
            tracing::warn!(
                count = reset_in_progress,
                "Reset uploads interrupted by a previous shutdown"
            );
        }
        let enqueued = self.enqueue_pending(None).await?;
        Ok(RecoveryReport {
            reset_in_progress,
            enqueued,
        })
    }

    /// Move due failed records back to pending and queue them, then re-queue
    /// pending records that missed the queue.
    pub async fn scan_retries(&self) -> CacheResult<ScanReport> {
        let now = self.inner.clock.now();
        let due = self
            .inner
            .metadata
            .list_due_retries(now, self.inner.batch_size)
            .await?;
        let mut report = ScanReport {
            due_retries: due.len() as u64,
            enqueued: 0,
        };

        for id in &due {
            let _guard = self.inner.locks.lock(id.as_str()).await;
            if self
                .inner
                .metadata
                .transition_upload_status(id, UploadStatus::Failed, UploadStatus::Pending, now)
                .await?
            {
                tracing::debug!(image_id = %id, "Retry due, back to pending");
            }
        }

        report.enqueued = self.enqueue_pending(Some(1)).await?;
        Ok(report)
    }

    /// Queue pending records, oldest first, until the queue is full.
    async fn enqueue_pending(&self, max_pages: Option<usize>) -> CacheResult<u64> {
        if self.inner.queue.is_none() {
            return Ok(0);
        }
        let mut enqueued = 0;
        let mut offset = 0;
        let mut pages = 0;
        loop {
            if max_pages.is_some_and(|max| pages >= max) {
                break;
            }
            pages += 1;
            let page = self
                .inner
                .metadata
                .list_images(&ImageFilter {
                    upload_status: Some(UploadStatus::Pending),
                    order: ImageOrder::CreatedAsc,
                    limit: Some(self.inner.batch_size),
                    offset,
                    ..ImageFilter::default()
                })
                .await?;
            if page.is_empty() {
                break;
            }
            offset += page.len() as u32;
            for record in page {
                if !self.enqueue(&record.id) {
                    return Ok(enqueued);
                }
                enqueued += 1;
            }
        }
        Ok(enqueued)
    }
}

/// Fixed-size pool of upload workers plus the retry scanner.
pub struct ArchivePool {
    controller: CacheController,
    receiver: ArchiveReceiver,
    config: ArchiveConfig,
}

impl ArchivePool {
    pub fn new(controller: CacheController, receiver: ArchiveReceiver, config: ArchiveConfig) -> Self {
        Self {
            controller,
            receiver,
            config,
        }
    }

    /// Start the pool. It runs until `shutdown` is cancelled, then waits for
    /// in-flight uploads.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, shutdown: CancellationToken) {
        let Self {
            controller,
            mut receiver,
            config,
        } = self;

        match controller.recover_uploads().await {
            Ok(report) => tracing::info!(
                reset_in_progress = report.reset_in_progress,
                enqueued = report.enqueued,
                "Archive recovery finished"
            ),
            Err(e) => tracing::error!(error = %e, "Archive recovery failed"),
        }

        let scanner = tokio::spawn(retry_scanner(
            controller.clone(),
            config.retry_scan_interval(),
            shutdown.clone(),
        ));

        tracing::info!(workers = config.workers, "Archive pool started");
        let permits = Arc::new(Semaphore::new(config.workers));
        let mut jobs = JoinSet::new();
        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let id = tokio::select! {
                _ = shutdown.cancelled() => break,
                id = receiver.recv() => match id {
                    Some(id) => id,
                    None => break,
                },
            };

            let controller = controller.clone();
            jobs.spawn(async move {
                let _permit = permit;
                run_job(&controller, &id).await;
            });
            while let Some(finished) = jobs.try_join_next() {
                log_join(finished);
            }
        }

        tracing::info!(in_flight = jobs.len(), "Archive pool stopping");
        while let Some(finished) = jobs.join_next().await {
            log_join(finished);
        }
        if let Err(e) = scanner.await {
            tracing::error!(error = %e, "Retry scanner task failed");
        }
    }
}

async fn run_job(controller: &CacheController, id: &ImageId) {
    match controller.archive_now(id).await {
        Ok(outcome) => tracing::debug!(image_id = %id, ?outcome, "Archive job finished"),
        // Already logged and recorded on the record.
        Err(CacheError::SourceMissing(_)) => {}
        Err(e) => tracing::error!(image_id = %id, error = %e, "Archive job failed"),
    }
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "Archive job panicked");
    }
}

async fn retry_scanner(
    controller: CacheController,
    period: std::time::Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match controller.scan_retries().await {
            Ok(report) if report.due_retries > 0 || report.enqueued > 0 => tracing::info!(
                due_retries = report.due_retries,
                enqueued = report.enqueued,
                "Retry scan queued uploads"
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Retry scan failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ImageId {
        ImageId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_queue_deduplicates() {
        let (queue, mut receiver) = archive_channel(4);
        assert!(queue.enqueue(id("a")));
        assert!(queue.enqueue(id("a")));
        assert!(queue.enqueue(id("b")));
        assert_eq!(queue.len(), 2);

        assert_eq!(receiver.recv().await, Some(id("a")));
        assert_eq!(receiver.recv().await, Some(id("b")));
        assert!(queue.is_empty());

        // Dequeued ids can be queued again.
        assert!(queue.enqueue(id("a")));
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_blocking() {
        let (queue, _receiver) = archive_channel(1);
        assert!(queue.enqueue(id("a")));
        assert!(!queue.enqueue(id("b")));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects() {
        let (queue, receiver) = archive_channel(4);
        drop(receiver);
        assert!(!queue.enqueue(id("a")));
        assert!(queue.is_empty());
    }
}
