//! Metadata store trait and SQLite implementation.

use crate::error::MetadataResult;
use crate::repos::{ImageRepo, SettingsRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: ImageRepo + SettingsRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if needed) a SQLite store and apply the schema.
    pub async fn new(path: impl AsRef<Path>, busy_timeout_secs: u64) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(busy_timeout_secs));

        let pool = SqlitePoolOptions::new()
            // One connection: SQLite serializes writers anyway, and a single
            // connection avoids "database is locked" under concurrent tasks.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::error::MetadataError;
    use crate::models::{
        ImageFilter, ImageOrder, ImageRecord, ImageRow, ImageStats, SettingsRow, StoredPolicy,
        to_millis,
    };
    use picvault_core::config::CachePolicy;
    use picvault_core::{ImageId, UploadStatus};
    use sqlx::QueryBuilder;
    use time::OffsetDateTime;

    const IMAGE_COLUMNS: &str = "id, content_type, size_bytes, checksum, local_present, \
         remote_present, upload_status, upload_attempts, next_attempt_at, last_error, \
         created_at, last_accessed_at, updated_at";

    fn push_filter<'a>(qb: &mut QueryBuilder<'a, Sqlite>, filter: &'a ImageFilter) {
        qb.push(" WHERE 1 = 1");
        if let Some(local) = filter.local_present {
            qb.push(" AND local_present = ").push_bind(local);
        }
        if let Some(remote) = filter.remote_present {
            qb.push(" AND remote_present = ").push_bind(remote);
        }
        if let Some(status) = filter.upload_status {
            qb.push(" AND upload_status = ").push_bind(status.as_str());
        }
        if let Some(before) = filter.created_before {
            qb.push(" AND created_at < ").push_bind(to_millis(before));
        }
    }

    #[async_trait]
    impl ImageRepo for SqliteStore {
        async fn insert_image(&self, record: &ImageRecord) -> MetadataResult<()> {
            // Ids of deleted or purged records stay retired.
            let result = sqlx::query(
                r#"
                INSERT INTO images (id, content_type, size_bytes, checksum, local_present,
                    remote_present, upload_status, upload_attempts, next_attempt_at, last_error,
                    created_at, last_accessed_at, updated_at)
                SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
                WHERE NOT EXISTS (SELECT 1 FROM deleted_images WHERE id = ?)
                "#,
            )
            .bind(record.id.as_str())
            .bind(&record.content_type)
            .bind(i64::try_from(record.size_bytes).unwrap_or(i64::MAX))
            .bind(record.checksum.to_hex())
            .bind(record.local_present)
            .bind(record.remote_present)
            .bind(record.upload_status.as_str())
            .bind(i64::from(record.upload_attempts))
            .bind(record.next_attempt_at.map(to_millis))
            .bind(&record.last_error)
            .bind(to_millis(record.created_at))
            .bind(to_millis(record.last_accessed_at))
            .bind(to_millis(record.updated_at))
            .bind(record.id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| MetadataError::from_insert(e, format!("image {}", record.id)))?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::AlreadyExists(format!(
                    "image {} (deleted)",
                    record.id
                )));
            }
            Ok(())
        }

        async fn get_image(&self, id: &ImageId) -> MetadataResult<Option<ImageRecord>> {
            let row = sqlx::query_as::<_, ImageRow>(&format!(
                "SELECT {IMAGE_COLUMNS} FROM images WHERE id = ?"
            ))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
            row.map(ImageRecord::try_from).transpose()
        }

        async fn id_taken(&self, id: &ImageId) -> MetadataResult<bool> {
            let taken: i64 = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM images WHERE id = ?) \
                 OR EXISTS (SELECT 1 FROM deleted_images WHERE id = ?)",
            )
            .bind(id.as_str())
            .bind(id.as_str())
            .fetch_one(&self.pool)
            .await?;
            Ok(taken != 0)
        }

        async fn delete_image(&self, id: &ImageId, at: OffsetDateTime) -> MetadataResult<bool> {
            let mut tx = self.pool.begin().await?;

            let result = sqlx::query("DELETE FROM images WHERE id = ?")
                .bind(id.as_str())
                .execute(&mut *tx)
                .await?;
            let removed = result.rows_affected() > 0;
            if removed {
                sqlx::query("INSERT OR IGNORE INTO deleted_images (id, deleted_at) VALUES (?, ?)")
                    .bind(id.as_str())
                    .bind(to_millis(at))
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            Ok(removed)
        }

        async fn touch_image(&self, id: &ImageId, at: OffsetDateTime) -> MetadataResult<()> {
            // last_accessed_at never moves backwards.
            sqlx::query(
                "UPDATE images SET last_accessed_at = MAX(last_accessed_at, ?) WHERE id = ?",
            )
            .bind(to_millis(at))
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn set_local_present(
            &self,
            id: &ImageId,
            present: bool,
            at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result =
                sqlx::query("UPDATE images SET local_present = ?, updated_at = ? WHERE id = ?")
                    .bind(present)
                    .bind(to_millis(at))
                    .bind(id.as_str())
                    .execute(&self.pool)
                    .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn clear_remote_present(
            &self,
            id: &ImageId,
            at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE images SET
                    remote_present = 0,
                    upload_status = CASE WHEN upload_status = 'done' THEN 'failed' ELSE upload_status END,
                    next_attempt_at = CASE WHEN upload_status = 'done' THEN NULL ELSE next_attempt_at END,
                    last_error = CASE WHEN upload_status = 'done' THEN 'remote copy deleted' ELSE last_error END,
                    updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(to_millis(at))
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn transition_upload_status(
            &self,
            id: &ImageId,
            from: UploadStatus,
            to: UploadStatus,
            at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            if !from.can_transition_to(to) {
                return Err(MetadataError::InvalidStateTransition {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
            let result = sqlx::query(
                "UPDATE images SET upload_status = ?, updated_at = ? WHERE id = ? AND upload_status = ?",
            )
            .bind(to.as_str())
            .bind(to_millis(at))
            .bind(id.as_str())
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn claim_upload(
            &self,
            id: &ImageId,
            at: OffsetDateTime,
        ) -> MetadataResult<Option<ImageRecord>> {
            // The UPDATE takes SQLite's write lock, so two claimers cannot both
            // observe 'pending'.
            let mut tx = self.pool.begin().await?;

            let result = sqlx::query(
                "UPDATE images SET upload_status = 'in_progress', updated_at = ? \
                 WHERE id = ? AND upload_status = 'pending'",
            )
            .bind(to_millis(at))
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;

            let claimed = if result.rows_affected() > 0 {
                sqlx::query_as::<_, ImageRow>(&format!(
                    "SELECT {IMAGE_COLUMNS} FROM images WHERE id = ?"
                ))
                .bind(id.as_str())
                .fetch_optional(&mut *tx)
                .await?
            } else {
                None
            };

            tx.commit().await?;
            claimed.map(ImageRecord::try_from).transpose()
        }

        async fn complete_upload(&self, id: &ImageId, at: OffsetDateTime) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE images SET
                    upload_status = 'done', remote_present = 1,
                    next_attempt_at = NULL, last_error = NULL, updated_at = ?
                WHERE id = ? AND upload_status = 'in_progress'
                "#,
            )
            .bind(to_millis(at))
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn fail_upload(
            &self,
            id: &ImageId,
            error: &str,
            next_attempt_at: Option<OffsetDateTime>,
            at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE images SET
                    upload_status = 'failed', upload_attempts = upload_attempts + 1,
                    next_attempt_at = ?, last_error = ?, updated_at = ?
                WHERE id = ? AND upload_status = 'in_progress'
                "#,
            )
            .bind(next_attempt_at.map(to_millis))
            .bind(error)
            .bind(to_millis(at))
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn list_images(&self, filter: &ImageFilter) -> MetadataResult<Vec<ImageRecord>> {
            let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {IMAGE_COLUMNS} FROM images"));
            push_filter(&mut qb, filter);
            qb.push(match filter.order {
                ImageOrder::CreatedAsc => " ORDER BY created_at ASC, rowid ASC",
                ImageOrder::LastAccessedAsc => " ORDER BY last_accessed_at ASC, rowid ASC",
                ImageOrder::CreatedDesc => " ORDER BY created_at DESC, rowid DESC",
            });
            // SQLite only accepts OFFSET after LIMIT; -1 means unbounded.
            qb.push(" LIMIT ")
                .push_bind(filter.limit.map(i64::from).unwrap_or(-1));
            qb.push(" OFFSET ").push_bind(i64::from(filter.offset));

            let rows = qb.build_query_as::<ImageRow>().fetch_all(&self.pool).await?;
            rows.into_iter().map(ImageRecord::try_from).collect()
        }

        async fn count_images(&self, filter: &ImageFilter) -> MetadataResult<u64> {
            let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM images");
            push_filter(&mut qb, filter);
            let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
            Ok(count.max(0) as u64)
        }

        async fn list_due_retries(
            &self,
            now: OffsetDateTime,
            limit: u32,
        ) -> MetadataResult<Vec<ImageId>> {
            let ids: Vec<String> = sqlx::query_scalar(
                r#"
                SELECT id FROM images
                WHERE upload_status = 'failed'
                  AND next_attempt_at IS NOT NULL AND next_attempt_at <= ?
                ORDER BY next_attempt_at ASC
                LIMIT ?
                "#,
            )
            .bind(to_millis(now))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            ids.iter()
                .map(|id| {
                    ImageId::parse(id)
                        .map_err(|e| MetadataError::Internal(format!("corrupt image id: {e}")))
                })
                .collect()
        }

        async fn reset_failed_uploads(&self, at: OffsetDateTime) -> MetadataResult<Vec<ImageId>> {
            let mut tx = self.pool.begin().await?;

            let ids: Vec<String> = sqlx::query_scalar(
                "SELECT id FROM images WHERE upload_status = 'failed' AND local_present = 1 \
                 ORDER BY created_at ASC",
            )
            .fetch_all(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE images SET
                    upload_status = 'pending', upload_attempts = 0,
                    next_attempt_at = NULL, updated_at = ?
                WHERE upload_status = 'failed' AND local_present = 1
                "#,
            )
            .bind(to_millis(at))
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            ids.iter()
                .map(|id| {
                    ImageId::parse(id)
                        .map_err(|e| MetadataError::Internal(format!("corrupt image id: {e}")))
                })
                .collect()
        }

        async fn reset_in_progress_uploads(&self, at: OffsetDateTime) -> MetadataResult<u64> {
            let result = sqlx::query(
                "UPDATE images SET upload_status = 'pending', updated_at = ? \
                 WHERE upload_status = 'in_progress'",
            )
            .bind(to_millis(at))
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        }

        async fn image_stats(&self) -> MetadataResult<ImageStats> {
            let row: (i64, i64, i64, i64, i64, i64, i64, i64, i64) = sqlx::query_as(
                r#"
                SELECT
                    COUNT(*),
                    COALESCE(SUM(local_present), 0),
                    COALESCE(SUM(CASE WHEN local_present = 1 THEN size_bytes ELSE 0 END), 0),
                    COALESCE(SUM(remote_present), 0),
                    COALESCE(SUM(upload_status = 'pending'), 0),
                    COALESCE(SUM(upload_status = 'in_progress'), 0),
                    COALESCE(SUM(upload_status = 'done'), 0),
                    COALESCE(SUM(upload_status = 'failed'), 0),
                    COALESCE(SUM(upload_status = 'failed' AND next_attempt_at IS NULL), 0)
                FROM images
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

            let n = |v: i64| v.max(0) as u64;
            Ok(ImageStats {
                total: n(row.0),
                local_count: n(row.1),
                local_bytes: n(row.2),
                remote_count: n(row.3),
                pending: n(row.4),
                in_progress: n(row.5),
                done: n(row.6),
                failed: n(row.7),
                parked: n(row.8),
            })
        }
    }

    #[async_trait]
    impl SettingsRepo for SqliteStore {
        async fn get_policy(&self) -> MetadataResult<Option<StoredPolicy>> {
            let row = sqlx::query_as::<_, SettingsRow>(
                "SELECT version, policy_json, updated_at FROM settings WHERE id = 1",
            )
            .fetch_optional(&self.pool)
            .await?;
            row.map(StoredPolicy::try_from).transpose()
        }

        async fn save_policy(
            &self,
            policy: &CachePolicy,
            at: OffsetDateTime,
        ) -> MetadataResult<StoredPolicy> {
            let json = serde_json::to_string(policy)
                .map_err(|e| MetadataError::Internal(format!("failed to encode policy: {e}")))?;

            let row = sqlx::query_as::<_, SettingsRow>(
                r#"
                INSERT INTO settings (id, version, policy_json, updated_at)
                VALUES (1, 1, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    version = settings.version + 1,
                    policy_json = excluded.policy_json,
                    updated_at = excluded.updated_at
                RETURNING version, policy_json, updated_at
                "#,
            )
            .bind(json)
            .bind(to_millis(at))
            .fetch_one(&self.pool)
            .await?;
            StoredPolicy::try_from(row)
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS images (
    id TEXT PRIMARY KEY NOT NULL,
    content_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL CHECK (size_bytes >= 0),
    checksum TEXT NOT NULL,
    local_present INTEGER NOT NULL,
    remote_present INTEGER NOT NULL,
    upload_status TEXT NOT NULL
        CHECK (upload_status IN ('pending', 'in_progress', 'done', 'failed')),
    upload_attempts INTEGER NOT NULL DEFAULT 0,
    next_attempt_at INTEGER,
    last_error TEXT,
    created_at INTEGER NOT NULL,
    last_accessed_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    CHECK (upload_status != 'done' OR remote_present = 1)
);

CREATE INDEX IF NOT EXISTS idx_images_local_created ON images (local_present, created_at);
CREATE INDEX IF NOT EXISTS idx_images_local_accessed ON images (local_present, last_accessed_at);
CREATE INDEX IF NOT EXISTS idx_images_status_next ON images (upload_status, next_attempt_at);

CREATE TABLE IF NOT EXISTS deleted_images (
    id TEXT PRIMARY KEY NOT NULL,
    deleted_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    policy_json TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;
