//! Cache error types.

use picvault_metadata::MetadataError;
use picvault_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("image already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("local write failed: {0}")]
    WriteError(String),

    #[error("local read failed: {0}")]
    ReadError(String),

    #[error("remote archive unavailable: {0}")]
    RemoteTransient(String),

    #[error("remote archive rejected the request: {0}")]
    RemoteFatal(String),

    #[error("local storage full: need {needed} bytes, {used} of {limit} bytes in use")]
    StorageFull { needed: u64, limit: u64, used: u64 },

    #[error("local copy missing for {0}")]
    SourceMissing(String),

    #[error("{0} timed out")]
    Timeout(String),

    #[error("metadata error: {0}")]
    Metadata(MetadataError),
}

impl CacheError {
    /// Classify a remote archive failure.
    pub fn from_remote(err: StorageError) -> Self {
        if err.is_not_found() {
            CacheError::NotFound(err.to_string())
        } else if err.is_transient() {
            CacheError::RemoteTransient(err.to_string())
        } else {
            CacheError::RemoteFatal(err.to_string())
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CacheError::RemoteTransient(_) | CacheError::Timeout(_) | CacheError::WriteError(_)
        )
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            CacheError::NotFound(_) => "not_found",
            CacheError::AlreadyExists(_) => "already_exists",
            CacheError::InvalidInput(_) => "invalid_input",
            CacheError::WriteError(_) => "write_error",
            CacheError::ReadError(_) => "read_error",
            CacheError::RemoteTransient(_) => "remote_transient",
            CacheError::RemoteFatal(_) => "remote_fatal",
            CacheError::StorageFull { .. } => "storage_full",
            CacheError::SourceMissing(_) => "source_missing",
            CacheError::Timeout(_) => "timeout",
            CacheError::Metadata(_) => "metadata_error",
        }
    }
}

impl From<MetadataError> for CacheError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::AlreadyExists(what) => CacheError::AlreadyExists(what),
            other => CacheError::Metadata(other),
        }
    }
}

impl From<picvault_core::Error> for CacheError {
    fn from(err: picvault_core::Error) -> Self {
        CacheError::InvalidInput(err.to_string())
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
