//! In-memory connection store using DashMap.
//!
//! Records live for the lifetime of the process only. Suitable for single
//! instance deployments and tests.

use std::collections::BTreeSet;
use std::ops::Bound;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::RwLock;

use super::traits::ConnectionStore;
use super::types::{Connection, Page, StoreBackend, StoreError};

/// In-memory connection store.
///
/// The primary map is keyed by connection id with the tenant as an indexed
/// attribute. Index entries whose record is gone or expired are skipped on
/// read and removed by `purge_expired`.
pub struct MemoryConnectionStore {
    /// connection_id -> Connection
    connections: DashMap<String, Connection>,
    /// tenant_id -> ordered connection ids
    tenant_index: DashMap<String, BTreeSet<String>>,
    /// Every connection id, ordered for global scans
    all_index: RwLock<BTreeSet<String>>,
}

impl MemoryConnectionStore {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            tenant_index: DashMap::new(),
            all_index: RwLock::new(BTreeSet::new()),
        }
    }

    fn remove_from_index(&self, tenant_id: &str, connection_id: &str) {
        if let Some(mut ids) = self.tenant_index.get_mut(tenant_id) {
            ids.remove(connection_id);
            if ids.is_empty() {
                drop(ids);
                self.tenant_index.remove_if(tenant_id, |_, ids| ids.is_empty());
            }
        }
    }

    /// Resolve ids to live records, keeping only those owned by `tenant_id` when given.
    fn resolve(&self, ids: &[String], tenant_id: Option<&str>) -> Vec<Connection> {
        let now = Utc::now();
        ids.iter()
            .filter_map(|id| self.connections.get(id).map(|c| c.clone()))
            .filter(|c| tenant_id.map_or(true, |t| c.tenant_id == t))
            .filter(|c| !c.is_expired_at(now))
            .collect()
    }
}

/// Up to `limit + 1` ids of `index` strictly after `cursor`.
fn ids_after(index: &BTreeSet<String>, cursor: Option<&str>, limit: usize) -> Vec<String> {
    let lower = match cursor {
        Some(c) => Bound::Excluded(c),
        None => Bound::Unbounded,
    };
    index
        .range::<str, _>((lower, Bound::Unbounded))
        .take(limit.max(1) + 1)
        .cloned()
        .collect()
}

/// Split `limit + 1` ordered ids into the page ids and the next cursor.
fn paginate(mut ids: Vec<String>, limit: usize) -> (Vec<String>, Option<String>) {
    let limit = limit.max(1);
    if ids.len() > limit {
        ids.truncate(limit);
        let cursor = ids.last().cloned();
        (ids, cursor)
    } else {
        (ids, None)
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    fn backend_type(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    async fn put(&self, connection: &Connection) -> Result<(), StoreError> {
        let id = connection.connection_id.clone();

        if let Some(previous) = self.connections.insert(id.clone(), connection.clone()) {
            if previous.tenant_id != connection.tenant_id {
                self.remove_from_index(&previous.tenant_id, &id);
            }
        }

        self.tenant_index
            .entry(connection.tenant_id.clone())
            .or_default()
            .insert(id.clone());
        self.all_index.write().await.insert(id);

        Ok(())
    }

    async fn delete(&self, tenant_id: &str, connection_id: &str) -> Result<bool, StoreError> {
        let removed = self
            .connections
            .remove_if(connection_id, |_, c| c.tenant_id == tenant_id)
            .is_some();
        self.remove_from_index(tenant_id, connection_id);
        if removed {
            self.all_index.write().await.remove(connection_id);
        }
        Ok(removed)
    }

    async fn query_tenant(
        &self,
        tenant_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page, StoreError> {
        let ids: Vec<String> = match self.tenant_index.get(tenant_id) {
            Some(index) => ids_after(&index, cursor, limit),
            None => Vec::new(),
        };

        let (ids, next_cursor) = paginate(ids, limit);
        Ok(Page {
            items: self.resolve(&ids, Some(tenant_id)),
            next_cursor,
        })
    }

    async fn scan(&self, cursor: Option<&str>, limit: usize) -> Result<Page, StoreError> {
        let ids = ids_after(&*self.all_index.read().await, cursor, limit);

        let (ids, next_cursor) = paginate(ids, limit);
        Ok(Page {
            items: self.resolve(&ids, None),
            next_cursor,
        })
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.connections.len())
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let expired: Vec<(String, String)> = self
            .connections
            .iter()
            .filter(|entry| entry.value().is_expired_at(now))
            .map(|entry| (entry.tenant_id.clone(), entry.key().clone()))
            .collect();

        let mut purged = 0;
        for (tenant_id, connection_id) in expired {
            if self
                .connections
                .remove_if(&connection_id, |_, c| c.is_expired_at(now))
                .is_some()
            {
                purged += 1;
                self.remove_from_index(&tenant_id, &connection_id);
            }
        }

        // Also drops ids left behind by a put racing a delete
        self.all_index
            .write()
            .await
            .retain(|id| self.connections.contains_key(id));

        Ok(purged)
    }
}

impl Default for MemoryConnectionStore {
    fn default() -> Self {
        Self::new()
    }
}
