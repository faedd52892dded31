//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    BROADCASTS_TOTAL, BROADCAST_DURATION, CONNECTIONS_DEREGISTERED_TOTAL,
    CONNECTIONS_REGISTERED_TOTAL, DELIVERIES_TOTAL, HANDSHAKES_REJECTED_TOTAL,
    RELAY_FORWARDED_TOTAL, RELAY_RECEIVED_TOTAL, STORE_ERRORS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Connection handshake and lifecycle metrics
pub struct HandshakeMetrics;

impl HandshakeMetrics {
    pub fn record_registered() {
        CONNECTIONS_REGISTERED_TOTAL.inc();
    }

    /// `reason` is `unauthenticated`, `tenant_not_provisioned` or `store_error`
    pub fn record_rejected(reason: &str) {
        HANDSHAKES_REJECTED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_closed() {
        CONNECTIONS_DEREGISTERED_TOTAL
            .with_label_values(&["closed"])
            .inc();
    }

    pub fn record_pruned() {
        CONNECTIONS_DEREGISTERED_TOTAL
            .with_label_values(&["stale"])
            .inc();
    }
}

/// Broadcast dispatch metrics
pub struct DispatchMetrics;

impl DispatchMetrics {
    pub fn record_broadcast(scope: &str, elapsed: Duration) {
        BROADCASTS_TOTAL.with_label_values(&[scope]).inc();
        BROADCAST_DURATION
            .with_label_values(&[scope])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_outcomes(delivered: usize, pruned: usize, transient: usize) {
        DELIVERIES_TOTAL
            .with_label_values(&["delivered"])
            .inc_by(delivered as u64);
        DELIVERIES_TOTAL
            .with_label_values(&["pruned"])
            .inc_by(pruned as u64);
        DELIVERIES_TOTAL
            .with_label_values(&["transient"])
            .inc_by(transient as u64);
    }
}

/// Cross-instance relay metrics
pub struct RelayMetrics;

impl RelayMetrics {
    /// `outcome` is `published`, `no_subscriber` or `error`
    pub fn record_forwarded(outcome: &str) {
        RELAY_FORWARDED_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// `outcome` is `delivered`, `pruned`, `transient` or `malformed`
    pub fn record_received(outcome: &str) {
        RELAY_RECEIVED_TOTAL.with_label_values(&[outcome]).inc();
    }
}

/// Connection store metrics
pub struct StoreMetrics;

impl StoreMetrics {
    /// `operation` is `register`, `deregister`, `list` or `purge`
    pub fn record_error(operation: &str) {
        STORE_ERRORS_TOTAL.with_label_values(&[operation]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_metrics_are_encoded() {
        HandshakeMetrics::record_rejected("unauthenticated");
        DispatchMetrics::record_broadcast("tenant", Duration::from_millis(3));
        DispatchMetrics::record_outcomes(2, 1, 0);
        StoreMetrics::record_error("list");
        RelayMetrics::record_forwarded("published");

        let output = encode_metrics().unwrap();
        assert!(output.contains("orders_handshakes_rejected_total"));
        assert!(output.contains("orders_broadcasts_total"));
        assert!(output.contains("orders_deliveries_total"));
        assert!(output.contains("orders_store_errors_total"));
        assert!(output.contains("orders_relay_forwarded_total"));
    }
}
