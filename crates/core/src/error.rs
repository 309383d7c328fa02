//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid image id: {0}")]
    InvalidImageId(String),

    #[error("invalid content type: {0}")]
    InvalidContentType(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    #[error("invalid upload status: {0}")]
    InvalidUploadStatus(String),

    #[error("invalid delete scope: {0}")]
    InvalidDeleteScope(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
