use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::metrics::{StoreMetrics, CONNECTIONS_ACTIVE};
use crate::store::ConnectionStore;

/// Background task that purges expired connection records.
///
/// Expired records are already invisible to listings; this only reclaims
/// their storage and keeps the active-connections gauge current.
pub struct ExpirySweeper {
    store: Arc<dyn ConnectionStore>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl ExpirySweeper {
    pub fn new(
        store: Arc<dyn ConnectionStore>,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            store,
            interval: interval.max(Duration::from_secs(1)),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            backend = self.store.backend_type().as_str(),
            "Expiry sweeper started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Expiry sweeper received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.sweep().await;
                }
            }
        }

        tracing::info!("Expiry sweeper stopped");
    }

    /// Run one purge pass. Returns the number of records removed.
    pub async fn sweep(&self) -> usize {
        let removed = match self.store.purge_expired().await {
            Ok(removed) => removed,
            Err(e) => {
                StoreMetrics::record_error("purge");
                tracing::warn!(error = %e, "Failed to purge expired connections");
                return 0;
            }
        };

        if removed > 0 {
            tracing::info!(removed = removed, "Purged expired connections");
        }

        if let Ok(count) = self.store.count().await {
            CONNECTIONS_ACTIVE.set(count as i64);
        }

        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Connection, MemoryConnectionStore};
    use chrono::Utc;

    async fn store_with_expired() -> Arc<MemoryConnectionStore> {
        let store = Arc::new(MemoryConnectionStore::new());
        let mut expired = Connection::new("r1", "old", None);
        expired.expires_at = Some(Utc::now() - chrono::Duration::seconds(5));
        store.put(&expired).await.unwrap();
        store
            .put(&Connection::new("r1", "live", Some(Duration::from_secs(60))))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_only() {
        let store = store_with_expired().await;
        let (_tx, rx) = broadcast::channel(1);
        let sweeper = ExpirySweeper::new(store.clone(), Duration::from_secs(60), rx);

        assert_eq!(sweeper.sweep().await, 1);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(sweeper.sweep().await, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = store_with_expired().await;
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(ExpirySweeper::new(store, Duration::from_secs(60), rx).run());

        tokio::task::yield_now().await;
        tx.send(()).unwrap();

        let stopped = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(stopped.is_ok());
    }
}
