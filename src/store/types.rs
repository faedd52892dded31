//! Connection record and store error types

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::redis::PoolError;

/// One live client channel as recorded in the store.
///
/// Attributes never change after registration; only existence is toggled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Owning restaurant, taken from the authenticated identity
    pub tenant_id: String,
    /// Opaque id assigned by the transport at handshake time
    pub connection_id: String,
    /// Process holding the socket; empty when unknown
    #[serde(default)]
    pub instance_id: String,
    pub connected_at: DateTime<Utc>,
    /// Advisory expiry; the store may drop the record once it has passed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Connection {
    pub fn new(
        tenant_id: impl Into<String>,
        connection_id: impl Into<String>,
        ttl: Option<Duration>,
    ) -> Self {
        let now = Utc::now();
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));

        Self {
            tenant_id: tenant_id.into(),
            connection_id: connection_id.into(),
            instance_id: String::new(),
            connected_at: now,
            expires_at,
        }
    }

    pub fn owned_by(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whole seconds left before expiry (at least 1), `None` when the record never expires
    pub fn remaining_ttl_secs(&self) -> Option<u64> {
        self.expires_at.map(|at| {
            let remaining = at.signed_duration_since(Utc::now()).num_seconds();
            remaining.max(1) as u64
        })
    }
}

/// One page of a store listing.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Connection>,
    /// Opaque cursor for the next page, `None` once the listing is exhausted
    pub next_cursor: Option<String>,
}

impl Page {
    pub fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Redis => "redis",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Record rejected before any I/O
    #[error("Invalid connection record: {0}")]
    InvalidRecord(String),

    #[error("Store backend error: {0}")]
    Backend(String),

    /// Backend temporarily unreachable (e.g. circuit breaker open)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::CircuitOpen => StoreError::Unavailable(err.to_string()),
            PoolError::Redis(e) => StoreError::Backend(e.to_string()),
        }
    }
}
