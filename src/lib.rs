// Infrastructure (shared components)
pub mod config;
pub mod error;
pub mod metrics;
pub mod redis;
pub mod telemetry;

// Domain layer
pub mod auth;
pub mod dispatch;
pub mod registry;
pub mod store;
pub mod transport;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod tasks;
