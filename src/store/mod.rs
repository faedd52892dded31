//! Connection store: the durable source of truth for which channels are live.
//!
//! Two backends implement [`ConnectionStore`]:
//!
//! - `MemoryConnectionStore`: DashMap-backed, process local (default)
//! - `RedisConnectionStore`: shared across instances, native key expiry
//!
//! Use [`create_connection_store`] to pick one from configuration.

mod memory;
mod redis_store;
mod traits;
mod types;

use std::sync::Arc;

use crate::config::StoreConfig;
use crate::redis::RedisPool;

pub use memory::MemoryConnectionStore;
pub use redis_store::RedisConnectionStore;
pub use traits::ConnectionStore;
pub use types::{Connection, Page, StoreBackend, StoreError};

/// Create a connection store based on configuration.
///
/// `"redis"` needs a pool; without one the memory backend is used and a
/// warning is logged.
pub fn create_connection_store(
    config: &StoreConfig,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn ConnectionStore> {
    match config.backend.as_str() {
        "redis" => match redis_pool {
            Some(pool) => {
                tracing::info!(
                    backend = "redis",
                    prefix = %config.key_prefix,
                    "Creating Redis connection store"
                );
                Arc::new(RedisConnectionStore::new(pool, config.key_prefix.clone()))
            }
            None => {
                tracing::warn!(
                    "Redis connection store requested but no pool provided, falling back to memory"
                );
                Arc::new(MemoryConnectionStore::new())
            }
        },
        _ => {
            tracing::info!(backend = "memory", "Creating memory connection store");
            Arc::new(MemoryConnectionStore::new())
        }
    }
}
