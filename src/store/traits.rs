//! Connection store trait definition

use async_trait::async_trait;

use super::types::{Connection, Page, StoreBackend, StoreError};

/// Durable keyed store of live connections.
///
/// Records are keyed by `(tenant_id, connection_id)`; a connection id belongs
/// to at most one tenant. Every listing is a restartable snapshot driven by an
/// opaque cursor, never a live view.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    fn backend_type(&self) -> StoreBackend;

    /// Insert or overwrite the record for `connection.connection_id`.
    async fn put(&self, connection: &Connection) -> Result<(), StoreError>;

    /// Delete the record if present. Returns whether a record was removed;
    /// an absent key is not an error.
    async fn delete(&self, tenant_id: &str, connection_id: &str) -> Result<bool, StoreError>;

    /// One page of the live connections of a tenant.
    async fn query_tenant(
        &self,
        tenant_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page, StoreError>;

    /// One page of all live connections.
    async fn scan(&self, cursor: Option<&str>, limit: usize) -> Result<Page, StoreError>;

    /// Number of records currently held (may include not-yet-purged expired ones).
    async fn count(&self) -> Result<usize, StoreError>;

    /// Physically remove expired records. Backends with native expiry only
    /// tidy their indexes here.
    async fn purge_expired(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}
