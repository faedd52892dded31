use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};

use crate::metrics::{HandshakeMetrics, StoreMetrics};
use crate::store::{Connection, ConnectionStore, StoreError};

/// Stream of connection pages; each connection appears at most once.
pub type ConnectionPages<'a> = BoxStream<'a, Result<Vec<Connection>, StoreError>>;

/// Owns the connection lifecycle: register, deregister and listing.
///
/// Holds no membership state of its own. Every call goes to the store, so a
/// listing always reflects the store at the time it is read.
pub struct ConnectionRegistry {
    store: Arc<dyn ConnectionStore>,
    ttl: Option<Duration>,
    page_size: usize,
    instance_id: String,
}

impl ConnectionRegistry {
    pub fn new(store: Arc<dyn ConnectionStore>, ttl: Option<Duration>, page_size: usize) -> Self {
        Self {
            store,
            ttl,
            page_size: page_size.max(1),
            instance_id: String::new(),
        }
    }

    /// Stamp records registered here with the id of this process.
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn store(&self) -> &Arc<dyn ConnectionStore> {
        &self.store
    }

    /// Advisory lifetime given to new records
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Record a freshly authenticated connection.
    ///
    /// Registering the same connection twice overwrites the record. The
    /// handshake must not be acknowledged unless this succeeds.
    #[tracing::instrument(name = "registry.register", skip(self))]
    pub async fn register(
        &self,
        tenant_id: &str,
        connection_id: &str,
    ) -> Result<Connection, StoreError> {
        if tenant_id.is_empty() {
            return Err(StoreError::InvalidRecord("empty tenant id".to_string()));
        }
        if connection_id.is_empty() {
            return Err(StoreError::InvalidRecord("empty connection id".to_string()));
        }

        let connection =
            Connection::new(tenant_id, connection_id, self.ttl).owned_by(self.instance_id.as_str());
        if let Err(e) = self.store.put(&connection).await {
            StoreMetrics::record_error("register");
            tracing::error!(
                tenant_id = %tenant_id,
                connection_id = %connection_id,
                error = %e,
                "Failed to register connection"
            );
            return Err(e);
        }

        HandshakeMetrics::record_registered();
        tracing::info!(
            tenant_id = %tenant_id,
            connection_id = %connection_id,
            expires_at = ?connection.expires_at,
            "Connection registered"
        );

        Ok(connection)
    }

    /// Push the expiry of a live connection forward by one lease.
    pub async fn renew(&self, connection: &Connection) -> Result<Connection, StoreError> {
        let mut renewed = Connection::new(
            connection.tenant_id.clone(),
            connection.connection_id.clone(),
            self.ttl,
        )
        .owned_by(connection.instance_id.as_str());
        renewed.connected_at = connection.connected_at;

        self.store.put(&renewed).await.inspect_err(|_| {
            StoreMetrics::record_error("register");
        })?;

        tracing::debug!(
            tenant_id = %renewed.tenant_id,
            connection_id = %renewed.connection_id,
            "Connection lease renewed"
        );
        Ok(renewed)
    }

    /// Delete the record, reporting whether one existed.
    pub async fn try_deregister(
        &self,
        tenant_id: &str,
        connection_id: &str,
    ) -> Result<bool, StoreError> {
        self.store
            .delete(tenant_id, connection_id)
            .await
            .inspect_err(|_| StoreMetrics::record_error("deregister"))
    }

    /// Delete the record if present.
    ///
    /// Never fails: graceful close and stale pruning may race on the same
    /// key, and an absent key is success. Store errors are logged and left
    /// to record expiry.
    #[tracing::instrument(name = "registry.deregister", skip(self))]
    pub async fn deregister(&self, tenant_id: &str, connection_id: &str) {
        match self.try_deregister(tenant_id, connection_id).await {
            Ok(true) => {
                tracing::info!(
                    tenant_id = %tenant_id,
                    connection_id = %connection_id,
                    "Connection deregistered"
                );
            }
            Ok(false) => {
                tracing::debug!(
                    tenant_id = %tenant_id,
                    connection_id = %connection_id,
                    "Connection already absent"
                );
            }
            Err(e) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    connection_id = %connection_id,
                    error = %e,
                    "Failed to deregister connection"
                );
            }
        }
    }

    /// Snapshot of the live connections of one tenant.
    pub async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<Connection>, StoreError> {
        self.pages_by_tenant(tenant_id).try_concat().await
    }

    /// Snapshot of every live connection.
    ///
    /// Materializes the whole set; large deployments should consume
    /// [`pages_all`](Self::pages_all) instead.
    pub async fn list_all(&self) -> Result<Vec<Connection>, StoreError> {
        self.pages_all().try_concat().await
    }

    pub fn pages_by_tenant(&self, tenant_id: &str) -> ConnectionPages<'_> {
        self.pages(Some(tenant_id.to_string()))
    }

    pub fn pages_all(&self) -> ConnectionPages<'_> {
        self.pages(None)
    }

    fn pages(&self, tenant_id: Option<String>) -> ConnectionPages<'_> {
        let page_size = self.page_size;

        stream! {
            let mut seen = HashSet::new();
            let mut cursor: Option<String> = None;

            loop {
                let result = match tenant_id.as_deref() {
                    Some(tenant) => self.store.query_tenant(tenant, cursor.as_deref(), page_size).await,
                    None => self.store.scan(cursor.as_deref(), page_size).await,
                };

                let page = match result {
                    Ok(page) => page,
                    Err(e) => {
                        StoreMetrics::record_error("list");
                        yield Err(e);
                        break;
                    }
                };

                let fresh: Vec<Connection> = page
                    .items
                    .into_iter()
                    .filter(|c| seen.insert(c.connection_id.clone()))
                    .collect();
                if !fresh.is_empty() {
                    yield Ok(fresh);
                }

                match page.next_cursor {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryConnectionStore;

    fn registry(page_size: usize) -> ConnectionRegistry {
        ConnectionRegistry::new(Arc::new(MemoryConnectionStore::new()), None, page_size)
    }

    fn ids(connections: &[Connection]) -> Vec<&str> {
        let mut ids: Vec<&str> = connections.iter().map(|c| c.connection_id.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    #[tokio::test]
    async fn test_register_then_list() {
        let registry = registry(10);
        registry.register("r1", "c1").await.unwrap();

        let listed = registry.list_by_tenant("r1").await.unwrap();
        assert_eq!(ids(&listed), vec!["c1"]);
    }

    #[tokio::test]
    async fn test_register_rejects_empty_ids() {
        let registry = registry(10);
        assert!(matches!(
            registry.register("", "c1").await,
            Err(StoreError::InvalidRecord(_))
        ));
        assert!(matches!(
            registry.register("r1", "").await,
            Err(StoreError::InvalidRecord(_))
        ));
        assert_eq!(registry.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_register_twice_keeps_one_record() {
        let registry = registry(10);
        registry.register("r1", "c1").await.unwrap();
        registry.register("r1", "c1").await.unwrap();

        assert_eq!(registry.list_by_tenant("r1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_sets_expiry_from_ttl() {
        let registry = ConnectionRegistry::new(
            Arc::new(MemoryConnectionStore::new()),
            Some(Duration::from_secs(120)),
            10,
        )
        .with_instance_id("orders-a");
        let connection = registry.register("r1", "c1").await.unwrap();
        assert!(connection.expires_at.is_some());
        assert_eq!(connection.instance_id, "orders-a");

        let renewed = registry.renew(&connection).await.unwrap();
        assert_eq!(renewed.connected_at, connection.connected_at);
        assert_eq!(renewed.instance_id, "orders-a");
        assert!(renewed.expires_at >= connection.expires_at);
    }

    #[tokio::test]
    async fn test_deregister_idempotent() {
        let registry = registry(10);
        registry.register("r1", "c1").await.unwrap();

        assert!(registry.try_deregister("r1", "c1").await.unwrap());
        assert!(!registry.try_deregister("r1", "c1").await.unwrap());

        registry.deregister("r1", "c1").await;
        registry.deregister("r1", "never-registered").await;
        assert!(registry.list_by_tenant("r1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_paging_covers_every_connection_once() {
        let registry = registry(2);
        for i in 0..7 {
            registry.register("r1", &format!("c{}", i)).await.unwrap();
        }
        registry.register("r2", "other").await.unwrap();

        let pages: Vec<Vec<Connection>> = registry
            .pages_by_tenant("r1")
            .try_collect()
            .await
            .unwrap();
        assert!(pages.iter().all(|p| p.len() <= 2));
        assert_eq!(pages.iter().map(Vec::len).sum::<usize>(), 7);

        let all = registry.list_all().await.unwrap();
        assert_eq!(all.len(), 8);
    }
}
