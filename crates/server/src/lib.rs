//! HTTP gateway for the picvault image cache.
//!
//! This crate is a thin adapter over [`picvault_cache::CacheController`]:
//! - Image ingest (base64 JSON and raw bodies)
//! - Image serving with tier reporting
//! - Admin endpoints (sweeps, upload retry, reconciliation, stats, settings)
//! - Health and Prometheus metrics

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
