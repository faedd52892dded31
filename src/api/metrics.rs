//! Prometheus metrics endpoint.

use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::metrics;
use crate::server::AppState;

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    update_metrics_from_state(&state).await;

    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(axum::http::header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Update gauges that are sampled rather than counted
async fn update_metrics_from_state(state: &AppState) {
    match state.store().count().await {
        Ok(count) => metrics::CONNECTIONS_ACTIVE.set(count as i64),
        Err(e) => tracing::debug!(error = %e, "Skipping connection gauge update"),
    }

    if state.redis_pool.is_some() {
        metrics::REDIS_CONNECTION_STATUS.set(i64::from(state.redis_health.is_healthy()));
        metrics::REDIS_CIRCUIT_BREAKER_STATE
            .set(state.redis_circuit_breaker.state().as_gauge());
    }
}
