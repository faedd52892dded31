use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;

use crate::config::DispatchConfig;
use crate::metrics::{DispatchMetrics, HandshakeMetrics};
use crate::registry::ConnectionRegistry;
use crate::store::Connection;
use crate::transport::{SendError, Transport};

use super::types::DeliveryOutcome;
use super::{BroadcastScope, DispatchError, DispatchReport, TransientFailure};

/// Statistics for the broadcast dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// Broadcasts that resolved their recipients
    pub total_broadcasts: AtomicU64,
    pub tenant_broadcasts: AtomicU64,
    pub global_broadcasts: AtomicU64,
    /// Broadcasts aborted by a store failure or an invalid scope
    pub failed_broadcasts: AtomicU64,
    pub total_attempted: AtomicU64,
    pub total_delivered: AtomicU64,
    pub total_pruned: AtomicU64,
    pub total_transient: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            total_broadcasts: self.total_broadcasts.load(Ordering::Relaxed),
            tenant_broadcasts: self.tenant_broadcasts.load(Ordering::Relaxed),
            global_broadcasts: self.global_broadcasts.load(Ordering::Relaxed),
            failed_broadcasts: self.failed_broadcasts.load(Ordering::Relaxed),
            total_attempted: self.total_attempted.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            total_pruned: self.total_pruned.load(Ordering::Relaxed),
            total_transient: self.total_transient.load(Ordering::Relaxed),
        }
    }

    fn record_report(&self, scope: &BroadcastScope, report: &DispatchReport) {
        self.total_broadcasts.fetch_add(1, Ordering::Relaxed);
        match scope {
            BroadcastScope::Tenant(_) => self.tenant_broadcasts.fetch_add(1, Ordering::Relaxed),
            BroadcastScope::All => self.global_broadcasts.fetch_add(1, Ordering::Relaxed),
        };
        self.total_attempted
            .fetch_add(report.attempted as u64, Ordering::Relaxed);
        self.total_delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.total_pruned
            .fetch_add(report.pruned as u64, Ordering::Relaxed);
        self.total_transient
            .fetch_add(report.transient_failures.len() as u64, Ordering::Relaxed);
    }
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub total_broadcasts: u64,
    pub tenant_broadcasts: u64,
    pub global_broadcasts: u64,
    pub failed_broadcasts: u64,
    pub total_attempted: u64,
    pub total_delivered: u64,
    pub total_pruned: u64,
    pub total_transient: u64,
}

/// Delivers one payload to every connection a scope resolves to.
///
/// Each connection gets exactly one send attempt. A `Gone` result removes
/// the connection from the registry; any other failure is reported and left
/// alone. One bad connection never stops delivery to the rest.
pub struct BroadcastDispatcher {
    registry: Arc<ConnectionRegistry>,
    transport: Arc<dyn Transport>,
    max_concurrent_sends: usize,
    send_timeout: Duration,
    stats: DispatcherStats,
}

impl BroadcastDispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        transport: Arc<dyn Transport>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            max_concurrent_sends: config.max_concurrent_sends.max(1),
            send_timeout: config.send_timeout(),
            stats: DispatcherStats::default(),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Deliver `payload` to every connection addressed by `scope`.
    ///
    /// Fails only when the scope is invalid or the recipients cannot be
    /// resolved. Per-connection failures are reported in the result.
    #[tracing::instrument(
        name = "dispatcher.broadcast",
        skip_all,
        fields(scope = %scope, payload_bytes = payload.len())
    )]
    pub async fn broadcast(
        &self,
        scope: BroadcastScope,
        payload: Bytes,
    ) -> Result<DispatchReport, DispatchError> {
        if matches!(&scope, BroadcastScope::Tenant(id) if id.trim().is_empty()) {
            self.stats.failed_broadcasts.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Rejected broadcast with empty tenant id");
            return Err(DispatchError::InvalidScope);
        }

        let started = Instant::now();
        let mut pages = match &scope {
            BroadcastScope::Tenant(id) => self.registry.pages_by_tenant(id),
            BroadcastScope::All => self.registry.pages_all(),
        };

        let mut report = DispatchReport::default();
        let mut futures = FuturesUnordered::new();
        let mut pending = 0;
        let mut resolve_error = None;

        while let Some(page) = pages.next().await {
            let connections = match page {
                Ok(connections) => connections,
                Err(e) => {
                    resolve_error = Some(e);
                    break;
                }
            };

            for connection in connections {
                report.attempted += 1;
                futures.push(self.deliver(connection, payload.clone()));
                pending += 1;

                // Process completed sends when we hit the concurrency limit
                while pending >= self.max_concurrent_sends {
                    match futures.next().await {
                        Some(outcome) => {
                            pending -= 1;
                            Self::tally(&mut report, outcome);
                        }
                        None => break,
                    }
                }
            }
        }

        // Sends already started still run to completion
        while let Some(outcome) = futures.next().await {
            Self::tally(&mut report, outcome);
        }

        if let Some(e) = resolve_error {
            self.stats.failed_broadcasts.fetch_add(1, Ordering::Relaxed);
            DispatchMetrics::record_outcomes(
                report.delivered,
                report.pruned,
                report.transient_failures.len(),
            );
            tracing::error!(
                error = %e,
                attempted = report.attempted,
                "Failed to resolve broadcast recipients"
            );
            return Err(e.into());
        }

        self.stats.record_report(&scope, &report);
        DispatchMetrics::record_broadcast(scope.as_label(), started.elapsed());
        DispatchMetrics::record_outcomes(
            report.delivered,
            report.pruned,
            report.transient_failures.len(),
        );

        if report.is_clean() {
            tracing::info!(
                attempted = report.attempted,
                delivered = report.delivered,
                pruned = report.pruned,
                "Broadcast dispatched"
            );
        } else {
            tracing::warn!(
                attempted = report.attempted,
                delivered = report.delivered,
                pruned = report.pruned,
                transient = report.transient_failures.len(),
                "Broadcast dispatched with transient failures"
            );
        }

        Ok(report)
    }

    async fn deliver(&self, connection: Connection, payload: Bytes) -> DeliveryOutcome {
        let sent = tokio::time::timeout(
            self.send_timeout,
            self.transport.send(&connection, payload),
        )
        .await;

        let reason = match sent {
            Ok(Ok(())) => return DeliveryOutcome::Delivered,
            Ok(Err(SendError::Gone)) => {
                tracing::info!(
                    tenant_id = %connection.tenant_id,
                    connection_id = %connection.connection_id,
                    "Pruning stale connection"
                );
                self.registry
                    .deregister(&connection.tenant_id, &connection.connection_id)
                    .await;
                HandshakeMetrics::record_pruned();
                return DeliveryOutcome::Pruned;
            }
            Ok(Err(SendError::Transient(reason))) => reason,
            Err(_) => format!("send timed out after {}ms", self.send_timeout.as_millis()),
        };

        tracing::warn!(
            tenant_id = %connection.tenant_id,
            connection_id = %connection.connection_id,
            reason = %reason,
            "Transient delivery failure"
        );

        DeliveryOutcome::Transient(TransientFailure {
            connection_id: connection.connection_id,
            tenant_id: connection.tenant_id,
            reason,
        })
    }

    fn tally(report: &mut DispatchReport, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => report.delivered += 1,
            DeliveryOutcome::Pruned => report.pruned += 1,
            DeliveryOutcome::Transient(failure) => report.transient_failures.push(failure),
        }
    }
}
