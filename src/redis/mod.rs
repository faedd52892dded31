//! Redis connectivity for the connection store
//!
//! - `CircuitBreaker`: stops hammering Redis while it is unavailable
//! - `RedisHealth`: connection health tracking surfaced on `/health` and `/metrics`
//! - `pool`: shared multiplexed connection used by `RedisConnectionStore`

mod circuit_breaker;
mod health;
pub mod pool;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use health::{RedisHealth, RedisHealthStats, RedisHealthStatus};
pub use pool::{PoolError, RedisPool};

/// Get current time in milliseconds since epoch
pub(crate) fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
