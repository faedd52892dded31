use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;

use crate::store::Connection;

use super::{LocalTransport, Relay, RelayedDelivery, SendError, Transport};

/// Sends to sockets held by this instance and relays the rest to their owner.
///
/// Only the owning instance can tell that a socket is closed, so deliveries
/// for foreign records never report [`SendError::Gone`].
pub struct RoutingTransport {
    instance_id: String,
    local: Arc<LocalTransport>,
    relay: Option<Arc<dyn Relay>>,
}

impl RoutingTransport {
    pub fn new(
        instance_id: impl Into<String>,
        local: Arc<LocalTransport>,
        relay: Option<Arc<dyn Relay>>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            local,
            relay,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

#[async_trait]
impl Transport for RoutingTransport {
    async fn send(&self, connection: &Connection, payload: Bytes) -> Result<(), SendError> {
        if connection.instance_id == self.instance_id {
            return self.local.deliver(&connection.connection_id, payload).await;
        }

        if connection.instance_id.is_empty() {
            return Err(SendError::Transient(
                "connection record names no owning instance".to_string(),
            ));
        }

        let Some(relay) = &self.relay else {
            return Err(SendError::Transient(format!(
                "connection held by instance {} and no relay is configured",
                connection.instance_id
            )));
        };

        let delivery = RelayedDelivery {
            tenant_id: connection.tenant_id.clone(),
            connection_id: connection.connection_id.clone(),
            from_instance: self.instance_id.clone(),
            payload,
        };
        relay.forward(&connection.instance_id, delivery).await
    }
}
