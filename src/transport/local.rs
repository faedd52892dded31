//! Outbound queues for WebSockets accepted by this process.

use axum::body::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::SendError;

const DEFAULT_CHANNEL_BUFFER: usize = 32;

/// Outbound queues of the WebSockets held by this process, keyed by connection id.
///
/// The WebSocket writer task owns the receiving half. Once it exits the
/// queue closes, and the next delivery reports [`SendError::Gone`].
pub struct LocalTransport {
    channels: DashMap<String, mpsc::Sender<Bytes>>,
    buffer: usize,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_CHANNEL_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            channels: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Assign a connection id and open its outbound queue.
    pub fn open(&self) -> (String, mpsc::Receiver<Bytes>) {
        let connection_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.buffer);
        self.channels.insert(connection_id.clone(), tx);
        (connection_id, rx)
    }

    /// Drop the outbound queue of a connection.
    pub fn close(&self, connection_id: &str) {
        self.channels.remove(connection_id);
    }

    pub fn open_count(&self) -> usize {
        self.channels.len()
    }

    /// Queue a payload for a socket held by this process.
    ///
    /// Callers must only pass ids this process opened; any id without an
    /// open queue is reported as [`SendError::Gone`].
    pub async fn deliver(&self, connection_id: &str, payload: Bytes) -> Result<(), SendError> {
        // Clone the sender so no map guard is held across the await
        let Some(tx) = self.channels.get(connection_id).map(|tx| tx.clone()) else {
            return Err(SendError::Gone);
        };

        if tx.send(payload).await.is_err() {
            self.channels.remove_if(connection_id, |_, tx| tx.is_closed());
            return Err(SendError::Gone);
        }

        Ok(())
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}
