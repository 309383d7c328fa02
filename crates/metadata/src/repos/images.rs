//! Image record repository.

use crate::error::MetadataResult;
use crate::models::{ImageFilter, ImageRecord, ImageStats};
use async_trait::async_trait;
use picvault_core::{ImageId, UploadStatus};
use time::OffsetDateTime;

/// Repository for image lifecycle records.
///
/// Status changes are compare-and-set: each returns whether the row was in
/// the expected state and got updated.
#[async_trait]
pub trait ImageRepo: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` if the id is taken.
    async fn insert_image(&self, record: &ImageRecord) -> MetadataResult<()>;

    async fn get_image(&self, id: &ImageId) -> MetadataResult<Option<ImageRecord>>;

    /// Whether `id` belongs to a live record or to one that was removed.
    async fn id_taken(&self, id: &ImageId) -> MetadataResult<bool>;

    /// Remove a record and retire its id. Returns `false` if it did not exist.
    async fn delete_image(&self, id: &ImageId, at: OffsetDateTime) -> MetadataResult<bool>;

    /// Record a successful read.
    async fn touch_image(&self, id: &ImageId, at: OffsetDateTime) -> MetadataResult<()>;

    /// Set or clear `local_present`. Returns `false` if the record is gone.
    async fn set_local_present(
        &self,
        id: &ImageId,
        present: bool,
        at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Clear `remote_present`. A `done` record becomes a parked `failed`
    /// record, since its local copy is no longer archived.
    async fn clear_remote_present(&self, id: &ImageId, at: OffsetDateTime)
    -> MetadataResult<bool>;

    /// Move `from -> to` if the record is currently in `from`.
    async fn transition_upload_status(
        &self,
        id: &ImageId,
        from: UploadStatus,
        to: UploadStatus,
        at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Claim a pending record for upload (`pending -> in_progress`).
    /// Returns the claimed record, or `None` if it was not pending.
    async fn claim_upload(
        &self,
        id: &ImageId,
        at: OffsetDateTime,
    ) -> MetadataResult<Option<ImageRecord>>;

    /// `in_progress -> done`, setting `remote_present`.
    async fn complete_upload(&self, id: &ImageId, at: OffsetDateTime) -> MetadataResult<bool>;

    /// `in_progress -> failed`, incrementing `upload_attempts`. A `None`
    /// retry time parks the record.
    async fn fail_upload(
        &self,
        id: &ImageId,
        error: &str,
        next_attempt_at: Option<OffsetDateTime>,
        at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    async fn list_images(&self, filter: &ImageFilter) -> MetadataResult<Vec<ImageRecord>>;

    /// Count records matching `filter` (ordering and paging are ignored).
    async fn count_images(&self, filter: &ImageFilter) -> MetadataResult<u64>;

    /// Failed records whose scheduled retry time has passed.
    async fn list_due_retries(&self, now: OffsetDateTime, limit: u32)
    -> MetadataResult<Vec<ImageId>>;

    /// Manual retry: every failed record that still has a local copy goes
    /// back to `pending` with its attempt count reset.
    async fn reset_failed_uploads(&self, at: OffsetDateTime) -> MetadataResult<Vec<ImageId>>;

    /// Crash recovery: `in_progress -> pending` for every record.
    async fn reset_in_progress_uploads(&self, at: OffsetDateTime) -> MetadataResult<u64>;

    async fn image_stats(&self) -> MetadataResult<ImageStats>;
}
