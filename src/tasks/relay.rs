use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::broadcast;

use crate::metrics::RelayMetrics;
use crate::redis::RedisPool;
use crate::transport::{RelayInbox, RelayedDelivery};

type SubscriptionError = Box<dyn std::error::Error + Send + Sync>;

/// Background task receiving deliveries relayed by other instances.
///
/// Listens on `{channel}:{instance_id}` over a dedicated pub/sub
/// connection and reconnects with exponential backoff.
pub struct RelaySubscriber {
    redis_pool: Arc<RedisPool>,
    channel: String,
    inbox: Arc<RelayInbox>,
    shutdown: broadcast::Receiver<()>,
}

impl RelaySubscriber {
    pub fn new(
        redis_pool: Arc<RedisPool>,
        channel_prefix: &str,
        instance_id: &str,
        inbox: Arc<RelayInbox>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            redis_pool,
            channel: format!("{}:{}", channel_prefix, instance_id),
            inbox,
            shutdown,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn run(mut self) {
        tracing::info!(channel = %self.channel, "Relay subscriber starting");

        let mut retry_delay = Duration::from_millis(100);
        let max_retry_delay = Duration::from_secs(30);

        loop {
            match self.run_subscription_loop().await {
                Ok(()) => {
                    tracing::info!("Relay subscriber stopped");
                    break;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        retry_delay_ms = retry_delay.as_millis(),
                        "Relay subscription error, reconnecting"
                    );

                    tokio::select! {
                        _ = self.shutdown.recv() => {
                            tracing::info!("Shutdown requested during relay reconnect delay");
                            break;
                        }
                        _ = tokio::time::sleep(retry_delay) => {
                            retry_delay = std::cmp::min(retry_delay * 2, max_retry_delay);
                        }
                    }
                }
            }
        }
    }

    async fn run_subscription_loop(&mut self) -> Result<(), SubscriptionError> {
        // Pub/sub needs its own connection
        let client = redis::Client::open(self.redis_pool.url())?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;

        tracing::info!(channel = %self.channel, "Subscribed to relay channel");

        let mut messages = pubsub.on_message();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.recv() => {
                    return Ok(());
                }

                msg = messages.next() => match msg {
                    Some(msg) => self.handle_frame(msg.get_payload_bytes()).await,
                    None => return Err("relay message stream ended".into()),
                },
            }
        }
    }

    async fn handle_frame(&self, frame: &[u8]) {
        let delivery = match RelayedDelivery::decode(frame) {
            Ok(delivery) => delivery,
            Err(e) => {
                RelayMetrics::record_received("malformed");
                tracing::warn!(error = %e, channel = %self.channel, "Dropping malformed relay frame");
                return;
            }
        };

        // Failures are logged and counted by the inbox
        let _ = self.inbox.accept(delivery).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisConfig;
    use crate::redis::{CircuitBreaker, RedisHealth};
    use crate::registry::ConnectionRegistry;
    use crate::store::MemoryConnectionStore;
    use crate::transport::LocalTransport;
    use axum::body::Bytes;

    fn subscriber(local: Arc<LocalTransport>) -> (RelaySubscriber, broadcast::Sender<()>) {
        let pool = RedisPool::new(
            RedisConfig::default(),
            Arc::new(CircuitBreaker::new()),
            Arc::new(RedisHealth::new()),
        )
        .unwrap();
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(MemoryConnectionStore::new()),
            None,
            10,
        ));
        let inbox = Arc::new(RelayInbox::new(local, registry));
        let (tx, rx) = broadcast::channel(1);

        (
            RelaySubscriber::new(Arc::new(pool), "orders:relay", "orders-a", inbox, rx),
            tx,
        )
    }

    #[test]
    fn test_channel_is_per_instance() {
        let (subscriber, _tx) = subscriber(Arc::new(LocalTransport::new()));
        assert_eq!(subscriber.channel(), "orders:relay:orders-a");
    }

    #[tokio::test]
    async fn test_frame_reaches_local_socket() {
        let local = Arc::new(LocalTransport::new());
        let (id, mut rx) = local.open();
        let (subscriber, _tx) = subscriber(local);

        let frame = RelayedDelivery {
            tenant_id: "r1".to_string(),
            connection_id: id,
            from_instance: "orders-b".to_string(),
            payload: Bytes::from_static(b"{\"order\":\"42\"}"),
        }
        .encode()
        .unwrap();
        subscriber.handle_frame(&frame).await;

        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"{\"order\":\"42\"}"));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_dropped() {
        let local = Arc::new(LocalTransport::new());
        let (_id, mut rx) = local.open();
        let (subscriber, _tx) = subscriber(local);

        subscriber.handle_frame(b"garbage").await;
        assert!(rx.try_recv().is_err());
    }
}
