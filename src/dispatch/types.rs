use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Which connections a broadcast addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastScope {
    /// All connections of one restaurant
    Tenant(String),
    /// Every registered connection
    All,
}

impl BroadcastScope {
    pub fn tenant(id: impl Into<String>) -> Self {
        BroadcastScope::Tenant(id.into())
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            BroadcastScope::Tenant(_) => "tenant",
            BroadcastScope::All => "all",
        }
    }
}

impl fmt::Display for BroadcastScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BroadcastScope::Tenant(id) => write!(f, "tenant:{}", id),
            BroadcastScope::All => f.write_str("all"),
        }
    }
}

/// A delivery that failed without proving the connection stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransientFailure {
    pub connection_id: String,
    pub tenant_id: String,
    pub reason: String,
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub attempted: usize,
    pub delivered: usize,
    pub pruned: usize,
    pub transient_failures: Vec<TransientFailure>,
}

impl DispatchReport {
    /// False when some connections may have missed the event.
    pub fn is_clean(&self) -> bool {
        self.transient_failures.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("broadcast scope names an empty tenant id")]
    InvalidScope,

    #[error("failed to resolve recipients: {0}")]
    Store(#[from] StoreError),
}

/// Result of a single send, before aggregation.
#[derive(Debug)]
pub(crate) enum DeliveryOutcome {
    Delivered,
    Pruned,
    Transient(TransientFailure),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_labels() {
        assert_eq!(BroadcastScope::tenant("r1").as_label(), "tenant");
        assert_eq!(BroadcastScope::All.as_label(), "all");
        assert_eq!(BroadcastScope::tenant("r1").to_string(), "tenant:r1");
    }

    #[test]
    fn test_report_cleanliness() {
        let mut report = DispatchReport {
            attempted: 2,
            delivered: 2,
            ..Default::default()
        };
        assert!(report.is_clean());

        report.transient_failures.push(TransientFailure {
            connection_id: "c1".into(),
            tenant_id: "r1".into(),
            reason: "timeout".into(),
        });
        assert!(!report.is_clean());
    }
}
