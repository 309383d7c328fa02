//! Configuration types shared across crates.

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Public base URL used when building image URLs. Relative URLs are
    /// returned when unset.
    #[serde(default)]
    pub public_base_url: Option<String>,
    /// Maximum accepted request body in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_body_bytes() -> usize {
    32 * 1024 * 1024
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_base_url: None,
            max_body_bytes: default_max_body_bytes(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Local blob store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Directory holding cached image files.
    #[serde(default = "default_local_path")]
    pub path: PathBuf,
}

fn default_local_path() -> PathBuf {
    PathBuf::from("./data/images")
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            path: default_local_path(),
        }
    }
}

/// Remote archive configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RemoteConfig {
    /// No remote tier. Images stay local and are never archived.
    #[default]
    Disabled,
    /// S3-compatible object storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// Access key ID. Falls back to the default AWS credential chain if not set.
        access_key_id: Option<String>,
        /// Secret access key. Falls back to the default AWS credential chain if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`). Required for MinIO.
        #[serde(default)]
        force_path_style: bool,
    },
    /// Cloudflare R2.
    R2 {
        /// Cloudflare account ID; the endpoint is derived from it.
        account_id: String,
        /// Bucket name.
        bucket: String,
        /// Optional key prefix.
        #[serde(default = "default_r2_prefix")]
        prefix: Option<String>,
        /// R2 access key ID.
        access_key_id: String,
        /// R2 secret access key.
        secret_access_key: String,
    },
}

fn default_r2_prefix() -> Option<String> {
    Some("openwebui".to_string())
}

impl RemoteConfig {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, RemoteConfig::Disabled)
    }

    /// Validate remote configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            RemoteConfig::Disabled => Ok(()),
            RemoteConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.is_empty() {
                    return Err("remote.bucket cannot be empty".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            RemoteConfig::R2 {
                account_id,
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if account_id.is_empty() || bucket.is_empty() {
                    return Err("r2 config requires account_id and bucket".to_string());
                }
                if access_key_id.is_empty() || secret_access_key.is_empty() {
                    return Err(
                        "r2 config requires access_key_id and secret_access_key".to_string(),
                    );
                }
                Ok(())
            }
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Busy timeout in seconds for lock contention.
        #[serde(default = "default_sqlite_busy_timeout_secs")]
        busy_timeout_secs: u64,
    },
}

fn default_sqlite_busy_timeout_secs() -> u64 {
    30
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            busy_timeout_secs: default_sqlite_busy_timeout_secs(),
        }
    }
}

/// Ordering used by the size sweep when choosing which local copy to evict.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionOrder {
    /// Least recently created first.
    #[default]
    Created,
    /// Least recently accessed first.
    LastAccessed,
}

/// Cache retention policy.
///
/// Seeded from the config file and then owned by the metadata store, so it
/// can be changed at runtime. Components read a fresh snapshot per
/// operation or sweep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Age after which archived local copies are evicted.
    #[serde(default = "default_local_ttl_hours")]
    pub local_ttl_hours: u64,
    /// Cap on total local usage in bytes. 0 means unlimited.
    #[serde(default)]
    pub max_local_bytes: u64,
    /// Age after which tierless metadata records are purged.
    #[serde(default = "default_metadata_retention_days")]
    pub metadata_retention_days: u64,
    /// Also delete the remote object when a record's metadata expires.
    #[serde(default)]
    pub delete_remote_on_metadata_expiry: bool,
    /// Allow eviction of local copies that have not been archived yet.
    /// This can destroy the only copy of an image.
    #[serde(default)]
    pub allow_unarchived_eviction: bool,
    /// Ordering for size-based eviction.
    #[serde(default)]
    pub eviction_order: EvictionOrder,
    /// Archival retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_local_ttl_hours() -> u64 {
    72
}

fn default_metadata_retention_days() -> u64 {
    365
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            local_ttl_hours: default_local_ttl_hours(),
            max_local_bytes: 0,
            metadata_retention_days: default_metadata_retention_days(),
            delete_remote_on_metadata_expiry: false,
            allow_unarchived_eviction: false,
            eviction_order: EvictionOrder::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl CachePolicy {
    pub fn local_ttl(&self) -> Duration {
        Duration::hours(i64::try_from(self.local_ttl_hours).unwrap_or(i64::MAX / 3600))
    }

    pub fn metadata_retention(&self) -> Duration {
        Duration::days(i64::try_from(self.metadata_retention_days).unwrap_or(i64::MAX / 86400))
    }

    /// The local size cap, or `None` when unlimited.
    pub fn size_limit(&self) -> Option<u64> {
        (self.max_local_bytes > 0).then_some(self.max_local_bytes)
    }

    /// Validate policy values.
    pub fn validate(&self) -> Result<(), String> {
        // Bounded so Duration::hours/days never overflow.
        const MAX_HOURS: u64 = 24 * 365 * 100;
        if self.local_ttl_hours == 0 || self.local_ttl_hours > MAX_HOURS {
            return Err(format!(
                "policy.local_ttl_hours must be between 1 and {MAX_HOURS}"
            ));
        }
        if self.metadata_retention_days == 0 || self.metadata_retention_days > MAX_HOURS / 24 {
            return Err(format!(
                "policy.metadata_retention_days must be between 1 and {}",
                MAX_HOURS / 24
            ));
        }
        if self.metadata_retention_days * 24 < self.local_ttl_hours {
            return Err(
                "policy.metadata_retention_days must cover at least policy.local_ttl_hours"
                    .to_string(),
            );
        }
        self.retry.validate()
    }
}

/// I/O timeouts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Timeout for a single local disk read or write.
    #[serde(default = "default_local_io_secs")]
    pub local_io_secs: u64,
    /// Timeout for a single remote archive call.
    #[serde(default = "default_remote_secs")]
    pub remote_secs: u64,
}

fn default_local_io_secs() -> u64 {
    10
}

fn default_remote_secs() -> u64 {
    30
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            local_io_secs: default_local_io_secs(),
            remote_secs: default_remote_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn local_io(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.local_io_secs)
    }

    pub fn remote(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.remote_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.local_io_secs == 0 || self.remote_secs == 0 {
            return Err("timeouts must be at least 1 second".to_string());
        }
        Ok(())
    }
}

/// Archive worker pool configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Number of concurrent upload workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Capacity of the in-memory job queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Interval between scans for due retries and pending records that
    /// missed the queue.
    #[serde(default = "default_retry_scan_interval_secs")]
    pub retry_scan_interval_secs: u64,
    /// Records read per metadata page by retry scans and sweeps.
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: u32,
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_retry_scan_interval_secs() -> u64 {
    60
}

fn default_scan_batch_size() -> u32 {
    500
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            retry_scan_interval_secs: default_retry_scan_interval_secs(),
            scan_batch_size: default_scan_batch_size(),
        }
    }
}

impl ArchiveConfig {
    pub fn retry_scan_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.retry_scan_interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("archive.workers must be at least 1".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("archive.queue_capacity must be at least 1".to_string());
        }
        // tokio::time::interval panics on a zero period
        if self.retry_scan_interval_secs == 0 {
            return Err("archive.retry_scan_interval_secs cannot be 0".to_string());
        }
        if self.scan_batch_size == 0 {
            return Err("archive.scan_batch_size must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Janitor sweep schedule.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JanitorConfig {
    /// Interval between TTL sweeps.
    #[serde(default = "default_ttl_sweep_interval_secs")]
    pub ttl_sweep_interval_secs: u64,
    /// Interval between size sweeps.
    #[serde(default = "default_size_sweep_interval_secs")]
    pub size_sweep_interval_secs: u64,
    /// Run the metadata retention sweep on a schedule.
    #[serde(default = "default_metadata_sweep_enabled")]
    pub metadata_sweep_enabled: bool,
    /// Interval between metadata retention sweeps.
    #[serde(default = "default_metadata_sweep_interval_secs")]
    pub metadata_sweep_interval_secs: u64,
}

fn default_ttl_sweep_interval_secs() -> u64 {
    3600 // 1 hour
}

fn default_size_sweep_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_metadata_sweep_enabled() -> bool {
    true
}

fn default_metadata_sweep_interval_secs() -> u64 {
    86400 // 1 day
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            ttl_sweep_interval_secs: default_ttl_sweep_interval_secs(),
            size_sweep_interval_secs: default_size_sweep_interval_secs(),
            metadata_sweep_enabled: default_metadata_sweep_enabled(),
            metadata_sweep_interval_secs: default_metadata_sweep_interval_secs(),
        }
    }
}

impl JanitorConfig {
    pub fn ttl_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ttl_sweep_interval_secs)
    }

    pub fn size_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.size_sweep_interval_secs)
    }

    pub fn metadata_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.metadata_sweep_interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.ttl_sweep_interval_secs == 0
            || self.size_sweep_interval_secs == 0
            || self.metadata_sweep_interval_secs == 0
        {
            return Err("janitor sweep intervals cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Local blob store configuration.
    #[serde(default)]
    pub local: LocalConfig,
    /// Remote archive configuration.
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Initial cache policy. Ignored once a policy has been persisted.
    #[serde(default)]
    pub policy: CachePolicy,
    /// I/O timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Archive worker pool configuration.
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Janitor schedule.
    #[serde(default)]
    pub janitor: JanitorConfig,
}

impl AppConfig {
    /// Create a test configuration rooted at `dir`.
    ///
    /// **For testing only.** Short sweep and scan intervals, no remote.
    pub fn for_testing(dir: &std::path::Path) -> Self {
        Self {
            local: LocalConfig {
                path: dir.join("images"),
            },
            metadata: MetadataConfig::Sqlite {
                path: dir.join("metadata.db"),
                busy_timeout_secs: 5,
            },
            archive: ArchiveConfig {
                workers: 2,
                queue_capacity: 64,
                retry_scan_interval_secs: 1,
                scan_batch_size: 100,
            },
            ..Self::default()
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.remote.validate()?;
        self.policy.validate()?;
        self.timeouts.validate()?;
        self.archive.validate()?;
        self.janitor.validate()
    }
}
