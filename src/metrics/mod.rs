//! Prometheus metrics for the order notification service.
//!
//! - Connection lifecycle (registered, deregistered by reason, rejected handshakes)
//! - Broadcast dispatch (by scope, per-connection outcome, latency)
//! - Cross-instance relay
//! - Connection store and Redis health

mod helpers;

pub use helpers::{encode_metrics, DispatchMetrics, HandshakeMetrics, RelayMetrics, StoreMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "orders";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Connection records currently held by the store
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Connection records currently held by the connection store"
    ).unwrap();

    pub static ref CONNECTIONS_REGISTERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_registered_total", METRIC_PREFIX),
        "Total connections registered after a successful handshake"
    ).unwrap();

    pub static ref CONNECTIONS_DEREGISTERED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_deregistered_total", METRIC_PREFIX),
        "Total connections removed from the registry",
        &["reason"]
    ).unwrap();

    pub static ref HANDSHAKES_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_handshakes_rejected_total", METRIC_PREFIX),
        "Total rejected connection handshakes",
        &["reason"]
    ).unwrap();

    // ============================================================================
    // Dispatch Metrics
    // ============================================================================

    pub static ref BROADCASTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_broadcasts_total", METRIC_PREFIX),
        "Total broadcasts dispatched",
        &["scope"]
    ).unwrap();

    pub static ref DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_deliveries_total", METRIC_PREFIX),
        "Per-connection delivery outcomes",
        &["outcome"]
    ).unwrap();

    pub static ref BROADCAST_DURATION: HistogramVec = register_histogram_vec!(
        format!("{}_broadcast_duration_seconds", METRIC_PREFIX),
        "Time to resolve and deliver one broadcast",
        &["scope"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 25.0]
    ).unwrap();

    // ============================================================================
    // Relay Metrics
    // ============================================================================

    pub static ref RELAY_FORWARDED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_relay_forwarded_total", METRIC_PREFIX),
        "Deliveries handed to another instance",
        &["outcome"]
    ).unwrap();

    pub static ref RELAY_RECEIVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_relay_received_total", METRIC_PREFIX),
        "Deliveries received from another instance",
        &["outcome"]
    ).unwrap();

    // ============================================================================
    // Store Metrics
    // ============================================================================

    pub static ref STORE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_store_errors_total", METRIC_PREFIX),
        "Connection store operation failures",
        &["operation"]
    ).unwrap();

    /// Redis connection status (1 = connected, 0 = disconnected)
    pub static ref REDIS_CONNECTION_STATUS: IntGauge = register_int_gauge!(
        format!("{}_redis_connection_status", METRIC_PREFIX),
        "Redis connection status (1=connected, 0=disconnected)"
    ).unwrap();

    /// Redis circuit breaker state (0=closed, 1=open, 2=half-open)
    pub static ref REDIS_CIRCUIT_BREAKER_STATE: IntGauge = register_int_gauge!(
        format!("{}_redis_circuit_breaker_state", METRIC_PREFIX),
        "Redis circuit breaker state (0=closed, 1=open, 2=half-open)"
    ).unwrap();
}
