//! Route configuration.

use crate::handlers;
use crate::metrics::{metrics_handler, track_requests};
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/images", post(handlers::create_image))
        .route(
            "/v1/images/{id}",
            put(handlers::put_image)
                .get(handlers::get_image)
                .delete(handlers::delete_image),
        )
        .route("/images/{id}", get(handlers::serve_image));

    let admin_routes = Router::new()
        .route("/v1/admin/sweeps/{kind}", post(handlers::run_sweep))
        .route("/v1/admin/uploads/retry", post(handlers::retry_uploads))
        .route("/v1/admin/reconcile", post(handlers::reconcile))
        .route("/v1/admin/stats", get(handlers::get_stats))
        .route(
            "/v1/admin/settings",
            get(handlers::get_settings).put(handlers::update_settings),
        );

    let mut router = Router::new().merge(api_routes).merge(admin_routes);

    // When enabled, restrict /metrics to the scraper at the network level.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .layer(DefaultBodyLimit::max(state.config.server.max_body_bytes))
        .layer(middleware::from_fn(track_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
