//! Request execution.
//!
//! # Architecture
//!
//! - **`request`**: methods, callbacks, form encoding and the request description
//! - **`context`**: the per-request state machine driven by transport events
//! - **`parser`**: raw response header block parsing
//! - **`sink`**: memory and file destinations for response bodies
//! - **`response`**: the completion value used by the future-based API
//!
//! # Request State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Created   │ ← Sink opened, request opened and sent
//!        └──────┬──────┘
//!               │ SendComplete → receive response
//!               ▼
//!        ┌──────────────────┐
//!        │ AwaitingHeaders  │
//!        └──────┬───────────┘
//!               │ HeadersAvailable, status 200 → first read
//!               ▼
//!        ┌──────────────────┐
//!        │     Reading      │ ← ReadComplete(n > 0): append, read again
//!        └──────┬───────────┘
//!               │ ReadComplete(0)
//!               ▼
//!          Completed
//!
//!   Any transport error, non-200 status or sink failure → Failed
//! ```
//!
//! Both terminal states share one finalization step: close the sink, run the
//! header callback, run the completion callback, release the connection and
//! close the request handle.

pub mod context;
pub mod parser;
pub mod request;
pub mod response;
pub mod sink;
