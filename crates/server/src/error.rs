//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use picvault_cache::CacheError;
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Cache(e) => e.code(),
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Cache(e) => match e {
                CacheError::NotFound(_) => StatusCode::NOT_FOUND,
                CacheError::AlreadyExists(_) => StatusCode::CONFLICT,
                CacheError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                CacheError::StorageFull { .. } => StatusCode::INSUFFICIENT_STORAGE,
                CacheError::RemoteTransient(_) | CacheError::Timeout(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                CacheError::RemoteFatal(_) => StatusCode::BAD_GATEWAY,
                CacheError::WriteError(_)
                | CacheError::ReadError(_)
                | CacheError::SourceMissing(_)
                | CacheError::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
