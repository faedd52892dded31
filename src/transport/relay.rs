//! Cross-instance delivery over Redis pub/sub.
//!
//! Each instance subscribes to `{channel}:{instance_id}`. A frame is a
//! compact JSON header, one newline, then the payload bytes untouched.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::metrics::{HandshakeMetrics, RelayMetrics};
use crate::redis::RedisPool;
use crate::registry::ConnectionRegistry;

use super::{LocalTransport, SendError};

const HEADER_END: u8 = b'\n';

/// A delivery addressed to a socket held by another instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayedDelivery {
    pub tenant_id: String,
    pub connection_id: String,
    pub from_instance: String,
    pub payload: Bytes,
}

#[derive(Serialize, Deserialize)]
struct RelayHeader {
    tenant_id: String,
    connection_id: String,
    from_instance: String,
}

impl RelayedDelivery {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let header = RelayHeader {
            tenant_id: self.tenant_id.clone(),
            connection_id: self.connection_id.clone(),
            from_instance: self.from_instance.clone(),
        };

        let mut frame = serde_json::to_vec(&header)?;
        frame.push(HEADER_END);
        frame.extend_from_slice(&self.payload);
        Ok(frame)
    }

    pub fn decode(frame: &[u8]) -> Result<Self, serde_json::Error> {
        let split = frame
            .iter()
            .position(|b| *b == HEADER_END)
            .ok_or_else(|| <serde_json::Error as serde::de::Error>::custom("missing header"))?;

        let header: RelayHeader = serde_json::from_slice(&frame[..split])?;
        Ok(Self {
            tenant_id: header.tenant_id,
            connection_id: header.connection_id,
            from_instance: header.from_instance,
            payload: Bytes::copy_from_slice(&frame[split + 1..]),
        })
    }
}

/// Hands a delivery to the instance that holds the socket.
///
/// Success means the owner accepted the hand-off, not that the socket was
/// written. Failures are always transient from the sender's side.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn forward(&self, instance_id: &str, delivery: RelayedDelivery)
        -> Result<(), SendError>;
}

pub struct RedisRelay {
    pool: Arc<RedisPool>,
    channel: String,
}

impl RedisRelay {
    pub fn new(pool: Arc<RedisPool>, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl Relay for RedisRelay {
    async fn forward(
        &self,
        instance_id: &str,
        delivery: RelayedDelivery,
    ) -> Result<(), SendError> {
        let frame = delivery
            .encode()
            .map_err(|e| SendError::Transient(e.to_string()))?;
        let channel = format!("{}:{}", self.channel, instance_id);

        let receivers: i64 = match self
            .pool
            .execute(|mut conn| async move { conn.publish::<_, _, i64>(&channel, frame).await })
            .await
        {
            Ok(receivers) => receivers,
            Err(e) => {
                RelayMetrics::record_forwarded("error");
                return Err(SendError::Transient(e.to_string()));
            }
        };

        // The owner may be restarting its subscription; its records expire if it is dead
        if receivers == 0 {
            RelayMetrics::record_forwarded("no_subscriber");
            return Err(SendError::Transient(format!(
                "instance {} is not listening",
                instance_id
            )));
        }

        RelayMetrics::record_forwarded("published");
        Ok(())
    }
}

/// Receiving end of the relay: writes relayed payloads to local sockets.
///
/// The owner is the only instance that may prune, so a closed socket found
/// here is deregistered here.
pub struct RelayInbox {
    local: Arc<LocalTransport>,
    registry: Arc<ConnectionRegistry>,
}

impl RelayInbox {
    pub fn new(local: Arc<LocalTransport>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { local, registry }
    }

    pub async fn accept(&self, delivery: RelayedDelivery) -> Result<(), SendError> {
        let result = self
            .local
            .deliver(&delivery.connection_id, delivery.payload)
            .await;

        match &result {
            Ok(()) => RelayMetrics::record_received("delivered"),
            Err(SendError::Gone) => {
                tracing::info!(
                    tenant_id = %delivery.tenant_id,
                    connection_id = %delivery.connection_id,
                    from_instance = %delivery.from_instance,
                    "Pruning stale connection reached through relay"
                );
                self.registry
                    .deregister(&delivery.tenant_id, &delivery.connection_id)
                    .await;
                HandshakeMetrics::record_pruned();
                RelayMetrics::record_received("pruned");
            }
            Err(SendError::Transient(reason)) => {
                tracing::warn!(
                    connection_id = %delivery.connection_id,
                    reason = %reason,
                    "Relayed delivery failed"
                );
                RelayMetrics::record_received("transient");
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryConnectionStore;

    fn delivery(connection_id: &str, payload: &'static [u8]) -> RelayedDelivery {
        RelayedDelivery {
            tenant_id: "r1".to_string(),
            connection_id: connection_id.to_string(),
            from_instance: "orders-b".to_string(),
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn test_frame_keeps_payload_bytes() {
        let original = delivery("c1", b"{\"note\":\"line one\nline two\"}\xff");
        let frame = original.encode().unwrap();

        assert_eq!(RelayedDelivery::decode(&frame).unwrap(), original);
    }

    #[test]
    fn test_frame_without_header_is_rejected() {
        assert!(RelayedDelivery::decode(b"no header here").is_err());
        assert!(RelayedDelivery::decode(b"{\"tenant_id\":1}\n{}").is_err());
    }

    #[tokio::test]
    async fn test_inbox_writes_to_local_socket() {
        let local = Arc::new(LocalTransport::new());
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(MemoryConnectionStore::new()),
            None,
            10,
        ));
        let (id, mut rx) = local.open();
        let inbox = RelayInbox::new(local, registry);

        inbox.accept(delivery(&id, b"{}")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"{}"));
    }

    #[tokio::test]
    async fn test_inbox_prunes_closed_socket() {
        let local = Arc::new(LocalTransport::new());
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(MemoryConnectionStore::new()),
            None,
            10,
        ));
        let (id, rx) = local.open();
        registry.register("r1", &id).await.unwrap();
        drop(rx);

        let inbox = RelayInbox::new(local, registry.clone());
        assert_eq!(inbox.accept(delivery(&id, b"{}")).await, Err(SendError::Gone));
        assert!(registry.list_by_tenant("r1").await.unwrap().is_empty());
    }
}
