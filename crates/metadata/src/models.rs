//! Database models mapping to the metadata schema.
//!
//! Timestamps are stored as INTEGER unix milliseconds so that SQL ordering
//! and range predicates compare numerically.

use crate::error::{MetadataError, MetadataResult};
use picvault_core::config::CachePolicy;
use picvault_core::{Checksum, ImageId, UploadStatus};
use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

/// Convert a timestamp to unix milliseconds.
pub fn to_millis(t: OffsetDateTime) -> i64 {
    (t.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Convert unix milliseconds to a timestamp.
pub fn from_millis(ms: i64) -> MetadataResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .map_err(|e| MetadataError::Internal(format!("timestamp {ms} out of range: {e}")))
}

/// Drop sub-millisecond precision so in-memory values equal stored ones.
pub fn truncate_millis(t: OffsetDateTime) -> OffsetDateTime {
    let nanos = t.nanosecond();
    t.replace_nanosecond(nanos - nanos % 1_000_000).unwrap_or(t)
}

// =============================================================================
// Images
// =============================================================================

/// Raw `images` row.
#[derive(Debug, Clone, FromRow)]
pub struct ImageRow {
    pub id: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub local_present: bool,
    pub remote_present: bool,
    pub upload_status: String,
    pub upload_attempts: i64,
    pub next_attempt_at: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub last_accessed_at: i64,
    pub updated_at: i64,
}

/// Lifecycle record of one cached image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRecord {
    pub id: ImageId,
    pub content_type: String,
    pub size_bytes: u64,
    pub checksum: Checksum,
    pub local_present: bool,
    pub remote_present: bool,
    pub upload_status: UploadStatus,
    pub upload_attempts: u32,
    /// When set on a failed record, the earliest time of the next automatic
    /// attempt. A failed record without it is parked.
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_attempt_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_accessed_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ImageRecord {
    /// A freshly written image: local only, waiting for archival.
    pub fn new(
        id: ImageId,
        content_type: String,
        size_bytes: u64,
        checksum: Checksum,
        now: OffsetDateTime,
    ) -> Self {
        let now = truncate_millis(now);
        Self {
            id,
            content_type,
            size_bytes,
            checksum,
            local_present: true,
            remote_present: false,
            upload_status: UploadStatus::Pending,
            upload_attempts: 0,
            next_attempt_at: None,
            last_error: None,
            created_at: now,
            last_accessed_at: now,
            updated_at: now,
        }
    }

    /// Object key shared by both tiers.
    pub fn object_key(&self) -> String {
        picvault_core::object_key(&self.id, &self.content_type)
    }

    /// Neither tier holds the bytes; the record must not be served.
    pub fn is_tierless(&self) -> bool {
        !self.local_present && !self.remote_present
    }

    /// Failed and waiting for a manual retry.
    pub fn is_parked(&self) -> bool {
        self.upload_status == UploadStatus::Failed && self.next_attempt_at.is_none()
    }
}

impl TryFrom<ImageRow> for ImageRecord {
    type Error = MetadataError;

    fn try_from(row: ImageRow) -> MetadataResult<Self> {
        let corrupt = |what: &str, detail: String| {
            MetadataError::Internal(format!("corrupt {what} for image {}: {detail}", row.id))
        };
        Ok(Self {
            id: ImageId::parse(&row.id).map_err(|e| corrupt("id", e.to_string()))?,
            checksum: Checksum::from_hex(&row.checksum)
                .map_err(|e| corrupt("checksum", e.to_string()))?,
            upload_status: row
                .upload_status
                .parse()
                .map_err(|e: picvault_core::Error| corrupt("upload_status", e.to_string()))?,
            size_bytes: u64::try_from(row.size_bytes)
                .map_err(|e| corrupt("size_bytes", e.to_string()))?,
            upload_attempts: u32::try_from(row.upload_attempts)
                .map_err(|e| corrupt("upload_attempts", e.to_string()))?,
            next_attempt_at: row.next_attempt_at.map(from_millis).transpose()?,
            created_at: from_millis(row.created_at)?,
            last_accessed_at: from_millis(row.last_accessed_at)?,
            updated_at: from_millis(row.updated_at)?,
            content_type: row.content_type,
            local_present: row.local_present,
            remote_present: row.remote_present,
            last_error: row.last_error,
        })
    }
}

/// Ordering of listed images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImageOrder {
    /// Oldest first.
    #[default]
    CreatedAsc,
    /// Least recently accessed first.
    LastAccessedAsc,
    /// Newest first.
    CreatedDesc,
}

/// Predicates for listing images. `None` fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct ImageFilter {
    pub local_present: Option<bool>,
    pub remote_present: Option<bool>,
    pub upload_status: Option<UploadStatus>,
    /// Only records created strictly before this time.
    pub created_before: Option<OffsetDateTime>,
    pub order: ImageOrder,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Aggregate counts over all images.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageStats {
    pub total: u64,
    pub local_count: u64,
    /// Sum of `size_bytes` over locally present images.
    pub local_bytes: u64,
    pub remote_count: u64,
    pub pending: u64,
    pub in_progress: u64,
    pub done: u64,
    pub failed: u64,
    /// Failed records with no automatic retry scheduled.
    pub parked: u64,
}

// =============================================================================
// Settings
// =============================================================================

/// Raw `settings` row.
#[derive(Debug, Clone, FromRow)]
pub struct SettingsRow {
    pub version: i64,
    pub policy_json: String,
    pub updated_at: i64,
}

/// A persisted, versioned cache policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredPolicy {
    pub version: u64,
    pub policy: CachePolicy,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TryFrom<SettingsRow> for StoredPolicy {
    type Error = MetadataError;

    fn try_from(row: SettingsRow) -> MetadataResult<Self> {
        let policy = serde_json::from_str(&row.policy_json)
            .map_err(|e| MetadataError::Internal(format!("corrupt stored policy: {e}")))?;
        Ok(Self {
            version: u64::try_from(row.version)
                .map_err(|e| MetadataError::Internal(format!("corrupt policy version: {e}")))?,
            policy,
            updated_at: from_millis(row.updated_at)?,
        })
    }
}
