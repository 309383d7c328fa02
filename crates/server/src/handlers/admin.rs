//! Admin and health handlers.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use picvault_cache::{CacheStats, ReconcileReport, RetryReport, SweepKind, SweepReport};
use picvault_core::config::CachePolicy;
use picvault_metadata::StoredPolicy;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub remote_enabled: bool,
}

/// GET /v1/health - Health check.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.cache.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        remote_enabled: state.cache.remote_enabled(),
    }))
}

/// POST /v1/admin/sweeps/{kind} - Run a sweep now.
pub async fn run_sweep(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> ApiResult<Json<SweepReport>> {
    let kind: SweepKind = kind.parse()?;
    tracing::info!(sweep = %kind, "Sweep requested");
    Ok(Json(state.cache.run_sweep(kind).await?))
}

/// POST /v1/admin/uploads/retry - Re-queue every parked upload.
pub async fn retry_uploads(State(state): State<AppState>) -> ApiResult<Json<RetryReport>> {
    Ok(Json(state.cache.retry_failed_uploads().await?))
}

/// POST /v1/admin/reconcile - Reconcile the local tier with the records.
pub async fn reconcile(State(state): State<AppState>) -> ApiResult<Json<ReconcileReport>> {
    Ok(Json(state.cache.reconcile().await?))
}

/// GET /v1/admin/stats - Cache statistics.
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<CacheStats>> {
    Ok(Json(state.cache.stats().await?))
}

/// GET /v1/admin/settings - Current cache policy.
pub async fn get_settings(State(state): State<AppState>) -> Json<StoredPolicy> {
    Json(state.cache.policy().as_ref().clone())
}

/// PUT /v1/admin/settings - Replace the cache policy.
pub async fn update_settings(
    State(state): State<AppState>,
    Json(policy): Json<CachePolicy>,
) -> ApiResult<Json<StoredPolicy>> {
    let stored = state.cache.update_policy(policy).await?;
    Ok(Json(stored.as_ref().clone()))
}
