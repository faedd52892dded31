//! Transport send primitive: delivery over an already established channel.
//!
//! Sockets live in the process that accepted them. [`RoutingTransport`]
//! writes to local sockets directly and hands deliveries for sockets held
//! elsewhere to a [`Relay`], which forwards them to the owning instance.

mod local;
mod relay;
mod routing;

use async_trait::async_trait;
use axum::body::Bytes;
use thiserror::Error;

use crate::store::Connection;

pub use local::LocalTransport;
pub use relay::{RedisRelay, Relay, RelayInbox, RelayedDelivery};
pub use routing::RoutingTransport;

/// Why a single delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The channel is known to be closed; the connection is stale
    #[error("connection is gone")]
    Gone,

    /// Any other failure; the channel may still be alive
    #[error("transient delivery failure: {0}")]
    Transient(String),
}

/// Delivers a payload to one connection.
///
/// One attempt per call, no retries. Implementations must report
/// [`SendError::Gone`] only when the channel is known to be closed.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, connection: &Connection, payload: Bytes) -> Result<(), SendError>;
}
