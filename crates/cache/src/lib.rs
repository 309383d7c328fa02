//! Tiered image cache for picvault.
//!
//! The [`CacheController`] owns the read and write paths across the local
//! disk tier and the optional remote archive. Around it run two kinds of
//! background work:
//!
//! - [`ArchivePool`]: uploads new images to the remote tier with bounded
//!   retries.
//! - [`Janitor`]: TTL, size-cap and metadata-retention sweeps.
//!
//! Every mutation of an image (write, read-repopulate, evict, upload claim,
//! delete) runs under a per-id lock, so a record's flags and the files it
//! points at stay consistent.

pub mod accounting;
pub mod archive;
pub mod clock;
pub mod controller;
pub mod error;
pub mod eviction;
pub mod janitor;
pub mod locks;
pub mod metrics;
pub mod settings;

pub use archive::{ArchiveOutcome, ArchivePool, RecoveryReport, ScanReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{
    CacheController, CacheParts, CacheStats, CachedImage, DeleteReport, ReconcileReport,
    RetryReport, Tier,
};
pub use error::{CacheError, CacheResult};
pub use eviction::{SweepKind, SweepReport};
pub use janitor::Janitor;
pub use settings::SettingsHandle;
