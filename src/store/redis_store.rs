//! Redis-backed connection store
//!
//! Layout under `{prefix}`:
//! - `{prefix}:conn:{connection_id}`: JSON record, with `EX` when it expires
//! - `{prefix}:tenant:{tenant_id}`: set of connection ids of one tenant
//! - `{prefix}:all`: set of every connection id
//!
//! Expiry is native Redis key expiry. Index members whose record has expired
//! are skipped on read and removed lazily.

use std::sync::Arc;

use async_trait::async_trait;
use redis::{AsyncCommands, RedisError};

use crate::redis::RedisPool;

use super::traits::ConnectionStore;
use super::types::{Connection, Page, StoreBackend, StoreError};

pub struct RedisConnectionStore {
    pool: Arc<RedisPool>,
    prefix: String,
}

impl RedisConnectionStore {
    pub fn new(pool: Arc<RedisPool>, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn record_key(&self, connection_id: &str) -> String {
        format!("{}:conn:{}", self.prefix, connection_id)
    }

    fn tenant_key(&self, tenant_id: &str) -> String {
        format!("{}:tenant:{}", self.prefix, tenant_id)
    }

    fn all_key(&self) -> String {
        format!("{}:all", self.prefix)
    }

    async fn get_record(&self, connection_id: &str) -> Result<Option<Connection>, StoreError> {
        let key = self.record_key(connection_id);
        let json: Option<String> = self
            .pool
            .execute(|mut conn| async move { conn.get(&key).await })
            .await?;

        json.map(|j| serde_json::from_str(&j))
            .transpose()
            .map_err(StoreError::from)
    }

    /// SSCAN one page of an index set.
    async fn scan_index(
        &self,
        set_key: String,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<(Vec<String>, Option<String>), StoreError> {
        let cursor: u64 = match cursor {
            Some(c) => c
                .parse()
                .map_err(|_| StoreError::InvalidRecord(format!("malformed cursor: {}", c)))?,
            None => 0,
        };
        let count = limit.max(1);

        let (next, ids): (u64, Vec<String>) = self
            .pool
            .execute(|mut conn| async move {
                redis::cmd("SSCAN")
                    .arg(&set_key)
                    .arg(cursor)
                    .arg("COUNT")
                    .arg(count)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        let next_cursor = (next != 0).then(|| next.to_string());
        Ok((ids, next_cursor))
    }

    /// Load records for `ids`. Returns the live records and the ids whose record is gone.
    async fn load(&self, ids: &[String]) -> Result<(Vec<Connection>, Vec<String>), StoreError> {
        if ids.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let keys: Vec<String> = ids.iter().map(|id| self.record_key(id)).collect();
        let values: Vec<Option<String>> = self
            .pool
            .execute(|mut conn| async move {
                redis::cmd("MGET").arg(&keys).query_async(&mut conn).await
            })
            .await?;

        let mut live = Vec::with_capacity(ids.len());
        let mut dangling = Vec::new();
        for (id, value) in ids.iter().zip(values) {
            match value {
                Some(json) => {
                    let connection: Connection = serde_json::from_str(&json)?;
                    if !connection.is_expired() {
                        live.push(connection);
                    }
                }
                None => dangling.push(id.clone()),
            }
        }

        Ok((live, dangling))
    }

    async fn forget(&self, set_keys: Vec<String>, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for key in &set_keys {
            pipe.cmd("SREM").arg(key).arg(ids).ignore();
        }

        self.pool
            .execute(|mut conn| async move {
                let result: Result<(), RedisError> = pipe.query_async(&mut conn).await;
                result
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ConnectionStore for RedisConnectionStore {
    fn backend_type(&self) -> StoreBackend {
        StoreBackend::Redis
    }

    async fn put(&self, connection: &Connection) -> Result<(), StoreError> {
        let id = &connection.connection_id;
        let json = serde_json::to_string(connection)?;
        let previous_tenant = self
            .get_record(id)
            .await?
            .map(|c| c.tenant_id)
            .filter(|t| *t != connection.tenant_id);

        let record_key = self.record_key(id);
        let tenant_key = self.tenant_key(&connection.tenant_id);

        let mut pipe = redis::pipe();
        pipe.atomic();
        match connection.remaining_ttl_secs() {
            Some(ttl) => {
                pipe.cmd("SET").arg(&record_key).arg(&json).arg("EX").arg(ttl).ignore();
                pipe.cmd("SADD").arg(&tenant_key).arg(id).ignore();
                // The tenant index outlives its newest member by one lease
                pipe.cmd("EXPIRE").arg(&tenant_key).arg(ttl).ignore();
            }
            None => {
                pipe.cmd("SET").arg(&record_key).arg(&json).ignore();
                pipe.cmd("SADD").arg(&tenant_key).arg(id).ignore();
                pipe.cmd("PERSIST").arg(&tenant_key).ignore();
            }
        }
        pipe.cmd("SADD").arg(self.all_key()).arg(id).ignore();
        if let Some(old) = previous_tenant {
            pipe.cmd("SREM").arg(self.tenant_key(&old)).arg(id).ignore();
        }

        self.pool
            .execute(|mut conn| async move {
                let result: Result<(), RedisError> = pipe.query_async(&mut conn).await;
                result
            })
            .await?;

        tracing::debug!(
            tenant_id = %connection.tenant_id,
            connection_id = %id,
            "Connection stored in Redis"
        );
        Ok(())
    }

    async fn delete(&self, tenant_id: &str, connection_id: &str) -> Result<bool, StoreError> {
        let owned = self
            .get_record(connection_id)
            .await?
            .is_some_and(|c| c.tenant_id == tenant_id);

        let mut pipe = redis::pipe();
        pipe.atomic();
        if owned {
            pipe.cmd("DEL").arg(self.record_key(connection_id)).ignore();
            pipe.cmd("SREM").arg(self.all_key()).arg(connection_id).ignore();
        }
        pipe.cmd("SREM")
            .arg(self.tenant_key(tenant_id))
            .arg(connection_id)
            .ignore();

        self.pool
            .execute(|mut conn| async move {
                let result: Result<(), RedisError> = pipe.query_async(&mut conn).await;
                result
            })
            .await?;

        Ok(owned)
    }

    async fn query_tenant(
        &self,
        tenant_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page, StoreError> {
        let tenant_key = self.tenant_key(tenant_id);
        let (ids, next_cursor) = self.scan_index(tenant_key.clone(), cursor, limit).await?;
        let (live, dangling) = self.load(&ids).await?;

        if let Err(e) = self.forget(vec![tenant_key, self.all_key()], &dangling).await {
            tracing::debug!(error = %e, "Failed to drop expired index entries");
        }

        let items = live
            .into_iter()
            .filter(|c| c.tenant_id == tenant_id)
            .collect();
        Ok(Page { items, next_cursor })
    }

    async fn scan(&self, cursor: Option<&str>, limit: usize) -> Result<Page, StoreError> {
        let (ids, next_cursor) = self.scan_index(self.all_key(), cursor, limit).await?;
        let (items, dangling) = self.load(&ids).await?;

        if let Err(e) = self.forget(vec![self.all_key()], &dangling).await {
            tracing::debug!(error = %e, "Failed to drop expired index entries");
        }

        Ok(Page { items, next_cursor })
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let key = self.all_key();
        let count: usize = self
            .pool
            .execute(|mut conn| async move { conn.scard(&key).await })
            .await?;
        Ok(count)
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        // Records expire natively; sweep the global index of ids whose record is gone.
        // Tenant indexes are cleaned on read and expire with their last lease.
        let mut cursor: Option<String> = None;
        let mut purged = 0;

        loop {
            let (ids, next) = self
                .scan_index(self.all_key(), cursor.as_deref(), 500)
                .await?;
            let (_, dangling) = self.load(&ids).await?;
            purged += dangling.len();
            self.forget(vec![self.all_key()], &dangling).await?;

            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        Ok(purged)
    }
}
