//! TTL, size and metadata-retention sweeps.
//!
//! A sweep pages through candidate records oldest first and re-checks each
//! one under its id lock before acting. Ids that are locked by a concurrent
//! operation are skipped and picked up by the next run.

use crate::controller::{CacheController, bounded};
use crate::error::{CacheError, CacheResult};
use crate::metrics;
use picvault_core::config::{CachePolicy, EvictionOrder};
use picvault_core::ImageId;
use picvault_metadata::models::{ImageFilter, ImageOrder};
use picvault_metadata::repos::ImageRepo;
use picvault_metadata::{ImageRecord, StoredPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use time::OffsetDateTime;

/// Kinds of janitor sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepKind {
    /// Evict archived local copies older than the local TTL.
    Ttl,
    /// Evict archived local copies until usage is within the cap.
    Size,
    /// Purge records that no tier holds any more.
    Metadata,
}

impl SweepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SweepKind::Ttl => "ttl",
            SweepKind::Size => "size",
            SweepKind::Metadata => "metadata",
        }
    }
}

impl fmt::Display for SweepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SweepKind {
    type Err = CacheError;

    fn from_str(s: &str) -> CacheResult<Self> {
        match s {
            "ttl" => Ok(SweepKind::Ttl),
            "size" => Ok(SweepKind::Size),
            "metadata" => Ok(SweepKind::Metadata),
            other => Err(CacheError::InvalidInput(format!("unknown sweep: {other}"))),
        }
    }
}

/// Result of one sweep run.
#[derive(Clone, Debug, Serialize)]
pub struct SweepReport {
    pub sweep: SweepKind,
    pub policy_version: u64,
    /// Candidate records looked at.
    pub examined: u64,
    /// Local copies evicted, or records purged for the metadata sweep.
    pub removed: u64,
    pub bytes_reclaimed: u64,
    /// Unarchived records left alone because unarchived eviction is off.
    pub skipped_unarchived: u64,
    /// Records locked by a concurrent operation.
    pub skipped_busy: u64,
    pub errors: u64,
    pub usage_bytes: u64,
    pub limit_bytes: Option<u64>,
    /// Size sweep: whether usage ended at or below the target. Always true
    /// for the other sweeps.
    pub target_reached: bool,
    pub duration_ms: u64,
}

impl SweepReport {
    fn new(sweep: SweepKind, stored: &StoredPolicy) -> Self {
        Self {
            sweep,
            policy_version: stored.version,
            examined: 0,
            removed: 0,
            bytes_reclaimed: 0,
            skipped_unarchived: 0,
            skipped_busy: 0,
            errors: 0,
            usage_bytes: 0,
            limit_bytes: stored.policy.size_limit(),
            target_reached: true,
            duration_ms: 0,
        }
    }

    fn record(&mut self, outcome: CacheResult<Outcome>, id: &ImageId) -> bool {
        self.examined += 1;
        match outcome {
            Ok(Outcome::Removed(bytes)) => {
                self.removed += 1;
                self.bytes_reclaimed += bytes;
                false
            }
            Ok(Outcome::Gone) => false,
            Ok(Outcome::Busy) => {
                self.skipped_busy += 1;
                true
            }
            Ok(Outcome::Ineligible) => true,
            Err(e) => {
                tracing::warn!(sweep = %self.sweep, image_id = %id, error = %e, "Sweep failed on record");
                self.errors += 1;
                true
            }
        }
    }
}

/// What happened to one candidate. Only `Busy`, `Ineligible` and errors
/// leave the record in the candidate set.
enum Outcome {
    Removed(u64),
    Gone,
    Busy,
    Ineligible,
}

/// Local copies may be evicted once archived, or always under the override.
fn evictable(record: &ImageRecord, policy: &CachePolicy) -> bool {
    record.remote_present || policy.allow_unarchived_eviction
}

fn remote_filter(policy: &CachePolicy) -> Option<bool> {
    if policy.allow_unarchived_eviction {
        None
    } else {
        Some(true)
    }
}

impl CacheController {
    /// Run one sweep of the given kind.
    pub async fn run_sweep(&self, kind: SweepKind) -> CacheResult<SweepReport> {
        match kind {
            SweepKind::Ttl => self.run_ttl_sweep().await,
            SweepKind::Size => self.run_size_sweep().await,
            SweepKind::Metadata => self.run_metadata_sweep().await,
        }
    }

    /// Evict local copies created more than the local TTL ago, oldest first.
    pub async fn run_ttl_sweep(&self) -> CacheResult<SweepReport> {
        let _running = self.inner.sweeps.ttl.lock().await;
        let started = Instant::now();
        let stored = self.inner.settings.snapshot();
        let policy = &stored.policy;
        let cutoff = self.inner.clock.now() - policy.local_ttl();
        let mut report = SweepReport::new(SweepKind::Ttl, &stored);

        let mut offset = 0;
        loop {
            let page = self
                .inner
                .metadata
                .list_images(&ImageFilter {
                    local_present: Some(true),
                    remote_present: remote_filter(policy),
                    created_before: Some(cutoff),
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
                let outcome = self
                    .evict_local_if(&record.id, "ttl", |r| {
                        evictable(r, policy) && r.created_at < cutoff
                    })
                    .await;
                if report.record(outcome, &record.id) {
                    offset += 1;
                }
            }
        }

        if !policy.allow_unarchived_eviction {
            report.skipped_unarchived = self
                .inner
                .metadata
                .count_images(&ImageFilter {
                    local_present: Some(true),
                    remote_present: Some(false),
                    created_before: Some(cutoff),
                    ..ImageFilter::default()
                })
                .await?;
        }

        Ok(self.finish(report, started))
    }

    /// Evict local copies until usage is at or below the configured cap.
    pub async fn run_size_sweep(&self) -> CacheResult<SweepReport> {
        let _running = self.inner.sweeps.size.lock().await;
        self.size_sweep_locked().await
    }

    pub(crate) async fn size_sweep_locked(&self) -> CacheResult<SweepReport> {
        let started = Instant::now();
        let stored = self.inner.settings.snapshot();
        let report = match stored.policy.size_limit() {
            Some(limit) => self.evict_to_target(limit, &stored).await?,
            None => SweepReport::new(SweepKind::Size, &stored),
        };
        Ok(self.finish(report, started))
    }

    /// Start a size sweep in the background unless one is already running.
    pub(crate) fn trigger_size_sweep(&self) {
        let Ok(running) = self.inner.sweeps.size.clone().try_lock_owned() else {
            return;
        };
        let this = self.clone();
        tokio::spawn(async move {
            let _running = running;
            if let Err(e) = this.size_sweep_locked().await {
                tracing::warn!(error = %e, "Triggered size sweep failed");
            }
        });
    }

    /// Evict eligible local copies in policy order until usage <= `target`.
    /// The caller holds the size sweep lock.
    pub(crate) async fn evict_to_target(
        &self,
        target: u64,
        stored: &StoredPolicy,
    ) -> CacheResult<SweepReport> {
        let policy = &stored.policy;
        let order = match policy.eviction_order {
            EvictionOrder::Created => ImageOrder::CreatedAsc,
            EvictionOrder::LastAccessed => ImageOrder::LastAccessedAsc,
        };
        let mut report = SweepReport::new(SweepKind::Size, stored);
        report.target_reached = false;

        let mut offset = 0;
        'pages: loop {
            if self.inner.usage.current() <= target {
                report.target_reached = true;
                break;
            }
            let page = self
                .inner
                .metadata
                .list_images(&ImageFilter {
                    local_present: Some(true),
                    remote_present: remote_filter(policy),
                    order,
                    limit: Some(self.inner.batch_size),
                    offset,
                    ..ImageFilter::default()
                })
                .await?;
            if page.is_empty() {
                break;
            }
            for record in page {
                if self.inner.usage.current() <= target {
                    report.target_reached = true;
                    break 'pages;
                }
                let outcome = self
                    .evict_local_if(&record.id, "size", |r| evictable(r, policy))
                    .await;
                if report.record(outcome, &record.id) {
                    offset += 1;
                }
            }
        }

        if !report.target_reached {
            if !policy.allow_unarchived_eviction {
                report.skipped_unarchived = self
                    .inner
                    .metadata
                    .count_images(&ImageFilter {
                        local_present: Some(true),
                        remote_present: Some(false),
                        ..ImageFilter::default()
                    })
                    .await?;
            }
            tracing::warn!(
                usage = self.inner.usage.current(),
                target,
                skipped_unarchived = report.skipped_unarchived,
                skipped_busy = report.skipped_busy,
                "Size sweep ran out of eligible candidates"
            );
        }
        Ok(report)
    }

    /// Remove records whose retention has expired and that no tier holds.
    /// With `delete_remote_on_metadata_expiry`, remote-only records are
    /// purged too, remote object first.
    pub async fn run_metadata_sweep(&self) -> CacheResult<SweepReport> {
        let _running = self.inner.sweeps.metadata.lock().await;
        let started = Instant::now();
        let stored = self.inner.settings.snapshot();
        let policy = &stored.policy;
        let cutoff = self.inner.clock.now() - policy.metadata_retention();
        let mut report = SweepReport::new(SweepKind::Metadata, &stored);

        self.purge_pass(&mut report, cutoff, false).await?;
        if policy.delete_remote_on_metadata_expiry {
            if self.remote_enabled() {
                self.purge_pass(&mut report, cutoff, true).await?;
            } else {
                tracing::debug!("Remote tier disabled, no remote objects to expire");
            }
        }

        Ok(self.finish(report, started))
    }

    async fn purge_pass(
        &self,
        report: &mut SweepReport,
        cutoff: OffsetDateTime,
        with_remote: bool,
    ) -> CacheResult<()> {
        let mut offset = 0;
        loop {
            let page = self
                .inner
                .metadata
                .list_images(&ImageFilter {
                    local_present: Some(false),
                    remote_present: Some(with_remote),
                    created_before: Some(cutoff),
                    order: ImageOrder::CreatedAsc,
                    limit: Some(self.inner.batch_size),
                    offset,
                    ..ImageFilter::default()
                })
                .await?;
            if page.is_empty() {
                return Ok(());
            }
            for record in page {
                let outcome = self.purge_record(&record.id, cutoff, with_remote).await;
                if report.record(outcome, &record.id) {
                    offset += 1;
                }
            }
        }
    }

    async fn purge_record(
        &self,
        id: &ImageId,
        cutoff: OffsetDateTime,
        delete_remote: bool,
    ) -> CacheResult<Outcome> {
        let Some(_guard) = self.inner.locks.try_lock(id.as_str()) else {
            return Ok(Outcome::Busy);
        };
        let Some(record) = self.inner.metadata.get_image(id).await? else {
            return Ok(Outcome::Gone);
        };
        if record.local_present || record.created_at >= cutoff {
            return Ok(Outcome::Gone);
        }

        let mut reclaimed = 0;
        if record.remote_present {
            if !delete_remote {
                return Ok(Outcome::Gone);
            }
            let remote = self.inner.remote.as_ref().ok_or_else(|| {
                CacheError::RemoteFatal("remote archive is not configured".to_string())
            })?;
            // delete() succeeds when the object is already absent.
            bounded(
                self.inner.timeouts.remote(),
                "remote delete",
                remote.delete(&record.object_key()),
            )
            .await?
            .map_err(CacheError::from_remote)?;
            reclaimed = record.size_bytes;
        }

        if self
            .inner
            .metadata
            .delete_image(id, self.inner.clock.now())
            .await?
        {
            metrics::RECORDS_PURGED.inc();
            tracing::debug!(image_id = %id, remote_deleted = record.remote_present, "Expired record purged");
            Ok(Outcome::Removed(reclaimed))
        } else {
            Ok(Outcome::Gone)
        }
    }

    /// Evict one local copy if, under its lock, it still passes `eligible`.
    async fn evict_local_if(
        &self,
        id: &ImageId,
        reason: &'static str,
        eligible: impl Fn(&ImageRecord) -> bool,
    ) -> CacheResult<Outcome> {
        let Some(_guard) = self.inner.locks.try_lock(id.as_str()) else {
            return Ok(Outcome::Busy);
        };
        let Some(record) = self.inner.metadata.get_image(id).await? else {
            return Ok(Outcome::Gone);
        };
        if !record.local_present {
            return Ok(Outcome::Gone);
        }
        if !eligible(&record) {
            return Ok(Outcome::Ineligible);
        }

        if self.drop_local_copy(&record, reason).await? {
            tracing::debug!(image_id = %id, reason, bytes = record.size_bytes, "Local copy evicted");
            Ok(Outcome::Removed(record.size_bytes))
        } else {
            Ok(Outcome::Gone)
        }
    }

    fn finish(&self, mut report: SweepReport, started: Instant) -> SweepReport {
        let elapsed = started.elapsed();
        report.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        report.usage_bytes = self.inner.usage.current();
        metrics::SWEEP_DURATION
            .with_label_values(&[report.sweep.as_str()])
            .observe(elapsed.as_secs_f64());
        tracing::info!(
            sweep = %report.sweep,
            examined = report.examined,
            removed = report.removed,
            bytes_reclaimed = report.bytes_reclaimed,
            skipped_unarchived = report.skipped_unarchived,
            errors = report.errors,
            usage_bytes = report.usage_bytes,
            "Sweep finished"
        );
        report
    }
}
