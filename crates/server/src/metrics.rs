//! HTTP metrics and the Prometheus scrape endpoint.
//!
//! Cache metrics live in [`picvault_cache::metrics`]; request metrics are
//! registered into the same registry so one scrape returns everything.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated. It exposes aggregate usage
//! only, but should still be network-restricted to the Prometheus scraper.

use axum::extract::{MatchedPath, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use picvault_cache::metrics::REGISTRY;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, TextEncoder};
use std::sync::{LazyLock, Once};
use std::time::Instant;

pub static HTTP_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "picvault_http_requests_total",
            "HTTP requests by route, method and status",
        ),
        &["route", "method", "status"],
    )
    .expect("metric creation failed")
});

pub static HTTP_REQUEST_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "picvault_http_request_duration_seconds",
            "HTTP request latency by route",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["route"],
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register cache and HTTP metrics. Safe to call more than once.
pub fn register_metrics() {
    picvault_cache::metrics::register_metrics();
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(HTTP_REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(HTTP_REQUEST_DURATION.clone()))
            .expect("metric registration failed");
    });
}

/// Middleware recording request counts and latency per matched route.
pub async fn track_requests(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());
    let method = req.method().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    HTTP_REQUEST_DURATION
        .with_label_values(&[route.as_str()])
        .observe(started.elapsed().as_secs_f64());
    HTTP_REQUESTS
        .with_label_values(&[route.as_str(), method.as_str(), response.status().as_str()])
        .inc();
    response
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}
