//! Route definitions for the metering gateway API.

use axum::{
    routing::{get, post},
    Router,
};

use crate::{handlers, state::AppState};

/// Create the main API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        // Webhook ingestion
        .route(
            "/webhooks/subscriptions/:provider",
            post(handlers::subscription_webhook),
        )
        // User-facing endpoints
        .nest("/v1", api_routes())
        // Admin endpoints
        .nest("/admin", admin_routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// User-facing API routes.
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/chat", post(handlers::chat))
        .route("/usage/:user_id", get(handlers::usage))
}

/// Admin/management routes.
fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/usage/:user_id", get(handlers::usage_trend))
        .route("/usage/:user_id/reset", post(handlers::reset_usage))
        .route("/tiers/summary", get(handlers::tiers_summary))
        .route("/snapshots", post(handlers::take_snapshot))
        .route("/snapshots/export", get(handlers::export_snapshots))
        .route("/audit/:user_id", get(handlers::audit_entries))
}
