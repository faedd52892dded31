//! Connection registry: lifecycle operations on top of the connection store.

mod connections;

pub use connections::{ConnectionPages, ConnectionRegistry};
