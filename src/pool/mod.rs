//! Connection pooling
//!
//! Connections are grouped by [`EndpointKey`] and capped per endpoint.
//! Requests beyond the cap queue per endpoint until a connection is released.

pub mod connection_pool;
pub mod endpoint;

pub use connection_pool::{Acquire, Checkout, ConnectionPool, PoolStats, Waiter};
pub use endpoint::EndpointKey;
