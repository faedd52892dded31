//! Broadcast dispatch: resolve the addressed connections and deliver one
//! payload to each, pruning the ones that turn out to be stale.

mod dispatcher;
mod types;

pub use dispatcher::{BroadcastDispatcher, DispatcherStats, DispatcherStatsSnapshot};
pub use types::{BroadcastScope, DispatchError, DispatchReport, TransientFailure};
