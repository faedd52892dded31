//! Registry and dispatcher integration tests
//!
//! Exercises connection lifecycle and broadcast delivery end to end over the
//! in-memory store, with a scripted transport standing in for live sockets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Bytes;

use order_notification_service::config::DispatchConfig;
use order_notification_service::dispatch::{BroadcastDispatcher, BroadcastScope, DispatchError};
use order_notification_service::registry::ConnectionRegistry;
use order_notification_service::store::{
    Connection, ConnectionStore, MemoryConnectionStore, Page, StoreBackend, StoreError,
};
use order_notification_service::transport::{SendError, Transport};

/// Transport that records deliveries and fails on cue
#[derive(Default)]
struct ScriptedTransport {
    failures: Mutex<HashMap<String, SendError>>,
    delivered: Mutex<Vec<(String, Bytes)>>,
}

impl ScriptedTransport {
    fn fail(&self, connection_id: &str, error: SendError) {
        self.failures
            .lock()
            .unwrap()
            .insert(connection_id.to_string(), error);
    }

    fn recipients(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, connection: &Connection, payload: Bytes) -> Result<(), SendError> {
        let connection_id = connection.connection_id.as_str();
        if let Some(err) = self.failures.lock().unwrap().get(connection_id) {
            return Err(err.clone());
        }
        self.delivered
            .lock()
            .unwrap()
            .push((connection_id.to_string(), payload));
        Ok(())
    }
}

/// Store wrapper counting reads, optionally failing reads or deletes
#[derive(Default)]
struct CountingStore {
    inner: MemoryConnectionStore,
    reads: AtomicUsize,
    fail_reads: bool,
    fail_deletes: bool,
}

impl CountingStore {
    fn failing() -> Self {
        Self {
            fail_reads: true,
            ..Default::default()
        }
    }

    fn failing_deletes() -> Self {
        Self {
            fail_deletes: true,
            ..Default::default()
        }
    }

    fn read(&self) -> Result<(), StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionStore for CountingStore {
    fn backend_type(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    async fn put(&self, connection: &Connection) -> Result<(), StoreError> {
        self.inner.put(connection).await
    }

    async fn delete(&self, tenant_id: &str, connection_id: &str) -> Result<bool, StoreError> {
        if self.fail_deletes {
            return Err(StoreError::Backend("delete rejected".to_string()));
        }
        self.inner.delete(tenant_id, connection_id).await
    }

    async fn query_tenant(
        &self,
        tenant_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Page, StoreError> {
        self.read()?;
        self.inner.query_tenant(tenant_id, cursor, limit).await
    }

    async fn scan(&self, cursor: Option<&str>, limit: usize) -> Result<Page, StoreError> {
        self.read()?;
        self.inner.scan(cursor, limit).await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.inner.count().await
    }
}

struct TestEnvironment {
    registry: Arc<ConnectionRegistry>,
    transport: Arc<ScriptedTransport>,
    dispatcher: BroadcastDispatcher,
}

fn environment_with(store: Arc<dyn ConnectionStore>) -> TestEnvironment {
    let config = DispatchConfig {
        page_size: 2,
        max_concurrent_sends: 2,
        send_timeout_ms: 200,
        ..Default::default()
    };
    let registry = Arc::new(ConnectionRegistry::new(store, None, config.page_size));
    let transport = Arc::new(ScriptedTransport::default());
    let dispatcher = BroadcastDispatcher::new(registry.clone(), transport.clone(), &config);

    TestEnvironment {
        registry,
        transport,
        dispatcher,
    }
}

fn environment() -> TestEnvironment {
    environment_with(Arc::new(MemoryConnectionStore::new()))
}

/// c1, c2 in r1 and c3 in r2
async fn seed(env: &TestEnvironment) {
    env.registry.register("r1", "c1").await.unwrap();
    env.registry.register("r1", "c2").await.unwrap();
    env.registry.register("r2", "c3").await.unwrap();
}

fn ids(connections: &[Connection]) -> Vec<&str> {
    let mut ids: Vec<&str> = connections
        .iter()
        .map(|c| c.connection_id.as_str())
        .collect();
    ids.sort_unstable();
    ids
}

// ============================================================================
// Registry lifecycle
// ============================================================================

#[tokio::test]
async fn test_registered_connection_listed_once() {
    let env = environment();
    env.registry.register("r1", "c1").await.unwrap();
    env.registry.register("r1", "c1").await.unwrap();

    let listed = env.registry.list_by_tenant("r1").await.unwrap();
    assert_eq!(ids(&listed), vec!["c1"]);
}

#[tokio::test]
async fn test_deregister_is_idempotent() {
    let env = environment();
    env.registry.register("r1", "c1").await.unwrap();

    env.registry.deregister("r1", "c1").await;
    env.registry.deregister("r1", "c1").await;
    env.registry.deregister("r1", "never-registered").await;

    assert!(env.registry.list_by_tenant("r1").await.unwrap().is_empty());
    assert!(env.registry.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_tenant_listings_are_isolated() {
    let env = environment();
    seed(&env).await;

    let r1 = env.registry.list_by_tenant("r1").await.unwrap();
    let r2 = env.registry.list_by_tenant("r2").await.unwrap();

    assert_eq!(ids(&r1), vec!["c1", "c2"]);
    assert_eq!(ids(&r2), vec!["c3"]);
    assert!(r1.iter().all(|c| c.tenant_id == "r1"));
}

#[tokio::test]
async fn test_listing_spans_multiple_pages() {
    let env = environment();
    for i in 0..7 {
        env.registry
            .register("r1", &format!("c{}", i))
            .await
            .unwrap();
    }

    assert_eq!(env.registry.list_by_tenant("r1").await.unwrap().len(), 7);
    assert_eq!(env.registry.list_all().await.unwrap().len(), 7);
}

// ============================================================================
// Broadcast dispatch
// ============================================================================

#[tokio::test]
async fn test_tenant_broadcast_reaches_exactly_tenant() {
    let env = environment();
    seed(&env).await;

    let payload = Bytes::from_static(br#"{"order":"42"}"#);
    let report = env
        .dispatcher
        .broadcast(BroadcastScope::tenant("r1"), payload.clone())
        .await
        .unwrap();

    assert_eq!(report.attempted, 2);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.pruned, 0);
    assert!(report.is_clean());
    assert_eq!(env.transport.recipients(), vec!["c1", "c2"]);

    // Payload is forwarded byte for byte
    let delivered = env.transport.delivered.lock().unwrap();
    assert!(delivered.iter().all(|(_, bytes)| *bytes == payload));
}

#[tokio::test]
async fn test_global_broadcast_reaches_everyone() {
    let env = environment();
    seed(&env).await;

    let report = env
        .dispatcher
        .broadcast(BroadcastScope::All, Bytes::from_static(br#"{"order":"42"}"#))
        .await
        .unwrap();

    assert_eq!(report.attempted, 3);
    assert_eq!(report.delivered, 3);
    assert_eq!(env.transport.recipients(), vec!["c1", "c2", "c3"]);
}

#[tokio::test]
async fn test_empty_tenant_scope_touches_nothing() {
    let store = Arc::new(CountingStore::default());
    let env = environment_with(store.clone());
    seed(&env).await;

    let result = env
        .dispatcher
        .broadcast(BroadcastScope::tenant(""), Bytes::from_static(b"{}"))
        .await;

    assert!(matches!(result, Err(DispatchError::InvalidScope)));
    assert_eq!(store.reads.load(Ordering::SeqCst), 0);
    assert!(env.transport.recipients().is_empty());
}

#[tokio::test]
async fn test_gone_connection_is_pruned() {
    let env = environment();
    env.registry.register("r1", "c1").await.unwrap();
    env.registry.register("r1", "c2").await.unwrap();
    env.registry.register("r1", "c3").await.unwrap();
    env.transport.fail("c2", SendError::Gone);

    let report = env
        .dispatcher
        .broadcast(BroadcastScope::tenant("r1"), Bytes::from_static(b"{}"))
        .await
        .unwrap();

    assert_eq!(report.delivered, 2);
    assert_eq!(report.pruned, 1);
    assert_eq!(env.transport.recipients(), vec!["c1", "c3"]);

    let remaining = env.registry.list_by_tenant("r1").await.unwrap();
    assert_eq!(ids(&remaining), vec!["c1", "c3"]);
}

#[tokio::test]
async fn test_global_broadcast_also_prunes() {
    let env = environment();
    seed(&env).await;
    env.transport.fail("c3", SendError::Gone);

    let report = env
        .dispatcher
        .broadcast(BroadcastScope::All, Bytes::from_static(b"{}"))
        .await
        .unwrap();

    assert_eq!(report.pruned, 1);
    assert!(env.registry.list_by_tenant("r2").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_prune_still_completes_broadcast() {
    let env = environment_with(Arc::new(CountingStore::failing_deletes()));
    seed(&env).await;
    env.transport.fail("c2", SendError::Gone);

    let report = env
        .dispatcher
        .broadcast(BroadcastScope::All, Bytes::from_static(b"{}"))
        .await
        .unwrap();

    assert_eq!(report.attempted, 3);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.pruned, 1);
    assert!(report.is_clean());
    assert_eq!(env.transport.recipients(), vec!["c1", "c3"]);

    // The record outlives the failed delete and is left to expiry
    let r1 = env.registry.list_by_tenant("r1").await.unwrap();
    assert_eq!(ids(&r1), vec!["c1", "c2"]);
}

#[tokio::test]
async fn test_transient_failure_is_isolated() {
    let env = environment();
    seed(&env).await;
    env.transport
        .fail("c1", SendError::Transient("socket buffer full".to_string()));

    let report = env
        .dispatcher
        .broadcast(BroadcastScope::All, Bytes::from_static(b"{}"))
        .await
        .unwrap();

    assert_eq!(report.attempted, 3);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.pruned, 0);
    assert!(!report.is_clean());
    assert_eq!(report.transient_failures.len(), 1);
    assert_eq!(report.transient_failures[0].connection_id, "c1");
    assert_eq!(report.transient_failures[0].tenant_id, "r1");

    // Transient failures keep the record
    assert_eq!(env.registry.list_all().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_store_failure_aborts_broadcast() {
    let env = environment_with(Arc::new(CountingStore::failing()));
    seed(&env).await;

    let result = env
        .dispatcher
        .broadcast(BroadcastScope::tenant("r1"), Bytes::from_static(b"{}"))
        .await;

    assert!(matches!(
        result,
        Err(DispatchError::Store(StoreError::Unavailable(_)))
    ));
    assert!(env.transport.recipients().is_empty());
}

#[tokio::test]
async fn test_broadcast_to_unknown_tenant_is_empty() {
    let env = environment();
    seed(&env).await;

    let report = env
        .dispatcher
        .broadcast(BroadcastScope::tenant("r404"), Bytes::from_static(b"{}"))
        .await
        .unwrap();

    assert_eq!(report.attempted, 0);
    assert!(report.is_clean());
}
