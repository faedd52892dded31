use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;

use crate::server::{api_key_auth, AppState};

use super::health::{health, stats};
use super::metrics::prometheus_metrics;
use super::orders::{broadcast_order, send_order};

/// Largest order event accepted by the ingestion routes
const MAX_EVENT_BYTES: usize = 256 * 1024;

pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        // Order event ingestion
        .nest(
            "/api/v1",
            Router::new()
                .route("/orders", post(send_order))
                .route("/orders/broadcast", post(broadcast_order))
                .layer(RequestBodyLimitLayer::new(MAX_EVENT_BYTES))
                .layer(middleware::from_fn_with_state(state, api_key_auth)),
        )
}
