//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::dispatch::DispatcherStatsSnapshot;
use crate::redis::CircuitState;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub store: StoreHealthResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthResponse>,
}

#[derive(Debug, Serialize)]
pub struct StoreHealthResponse {
    pub backend: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connections: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RedisHealthResponse {
    pub status: String,
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: ConnectionStats,
    pub dispatcher: DispatcherStatsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisStats>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionStats {
    /// Records held by the store, across all instances for shared backends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registered: Option<usize>,
    /// Sockets held by this process
    pub local_sockets: usize,
    pub instance_id: String,
}

#[derive(Debug, Serialize)]
pub struct RedisStats {
    pub status: String,
    pub connected: bool,
    pub circuit_breaker_state: String,
    pub circuit_breaker_failures: u32,
    pub reconnection_attempts: u32,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = state.store();
    let count = store.count().await;

    if let Err(ref e) = count {
        tracing::warn!(error = %e, "Connection store health probe failed");
    }

    let redis = state.redis_pool.as_ref().map(|_| {
        let redis_health = state.redis_health.stats();
        RedisHealthResponse {
            status: redis_health.status.as_str().to_string(),
            connected: state.redis_health.is_healthy(),
        }
    });

    let status = if count.is_ok() { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        store: StoreHealthResponse {
            backend: store.backend_type().as_str().to_string(),
            available: count.is_ok(),
            connections: count.ok(),
        },
        redis,
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let registered = state.store().count().await.ok();

    let redis = state.redis_pool.as_ref().map(|_| {
        let redis_health = state.redis_health.stats();
        let circuit_breaker = state.redis_circuit_breaker.stats();

        let circuit_state = match circuit_breaker.state {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };

        RedisStats {
            status: redis_health.status.as_str().to_string(),
            connected: state.redis_health.is_healthy(),
            circuit_breaker_state: circuit_state.to_string(),
            circuit_breaker_failures: circuit_breaker.failure_count,
            reconnection_attempts: redis_health.reconnection_attempts,
        }
    });

    Json(StatsResponse {
        connections: ConnectionStats {
            registered,
            local_sockets: state.transport.open_count(),
            instance_id: state.instance_id().to_string(),
        },
        dispatcher: state.dispatcher.stats(),
        redis,
    })
}
