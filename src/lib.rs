//! relay-http - asynchronous HTTP client engine
//!
//! Pooled, event-driven request execution over a pluggable transport, with
//! responses buffered in memory or streamed to a write device.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod pool;
pub mod transport;

pub use client::{HttpClient, UrlParts, crack_url};
pub use config::{ClientConfig, Timeouts};
pub use http::parser::HeaderMap;
pub use http::response::Completion;
