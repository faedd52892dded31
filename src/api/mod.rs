//! API layer - HTTP endpoint handlers organized by domain.

mod health;
mod metrics;
mod orders;
mod routes;

pub use health::{health, stats};
pub use metrics::prometheus_metrics;
pub use orders::{broadcast_order, send_order, DELIVERED_RESPONSE};
pub use routes::api_routes;
