//! Transport collaborator interface.
//!
//! The client never performs network I/O itself. A [`Transport`] opens one
//! long-lived [`Session`] per client; the session hands out connections and
//! request handles and reports progress by raising [`TransportEvent`]s on the
//! [`EventSender`] it was given when the request was opened.
//!
//! Every session call except the `close_*` teardown is fire-and-continue: an
//! `Ok` return means the operation was issued, and its outcome arrives later
//! as an event.

use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::config::Timeouts;
use crate::http::request::Method;
use crate::pool::EndpointKey;

/// Names the underlying transport call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOp {
    OpenSession,
    Connect,
    OpenRequest,
    AddHeaders,
    SendRequest,
    ReceiveResponse,
    QueryStatusCode,
    QueryHeaders,
    QueryDataAvailable,
    ReadData,
    WriteData,
    Unknown,
}

impl TransportOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportOp::OpenSession => "OpenSession",
            TransportOp::Connect => "Connect",
            TransportOp::OpenRequest => "OpenRequest",
            TransportOp::AddHeaders => "AddRequestHeaders",
            TransportOp::SendRequest => "SendRequest",
            TransportOp::ReceiveResponse => "ReceiveResponse",
            TransportOp::QueryStatusCode => "QueryStatusCode",
            TransportOp::QueryHeaders => "QueryHeaders",
            TransportOp::QueryDataAvailable => "QueryDataAvailable",
            TransportOp::ReadData => "ReadData",
            TransportOp::WriteData => "WriteData",
            TransportOp::Unknown => "unknown transport call",
        }
    }
}

impl fmt::Display for TransportOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed transport call, tagged with the operation and its error code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{op} failed - error code {code}")]
pub struct TransportError {
    pub op: TransportOp,
    pub code: u32,
}

impl TransportError {
    pub fn new(op: TransportOp, code: u32) -> Self {
        Self { op, code }
    }
}

/// Opaque handle to a live transport session bound to one endpoint.
///
/// Not `Clone`: a connection is owned either by the pool or by exactly one
/// in-flight request.
#[derive(Debug, PartialEq, Eq)]
pub struct Connection {
    id: u64,
    endpoint: EndpointKey,
}

impl Connection {
    pub fn new(id: u64, endpoint: EndpointKey) -> Self {
        Self { id, endpoint }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &EndpointKey {
        &self.endpoint
    }
}

/// Opaque handle to one request issued on a [`Connection`].
#[derive(Debug, PartialEq, Eq)]
pub struct RequestHandle {
    id: u64,
}

impl RequestHandle {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Status notifications raised by the transport for one request.
#[derive(Debug)]
pub enum TransportEvent {
    /// The request (and body, if any) has been written.
    SendComplete,
    /// Response headers can be queried.
    HeadersAvailable,
    /// A read finished. The buffer handed to `read_data` comes back holding
    /// the received bytes; an empty buffer marks the end of the body.
    ReadComplete(BytesMut),
    /// An asynchronous call failed.
    Error(TransportError),
}

impl TransportEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::SendComplete => "SendComplete",
            TransportEvent::HeadersAvailable => "HeadersAvailable",
            TransportEvent::ReadComplete(_) => "ReadComplete",
            TransportEvent::Error(_) => "Error",
        }
    }
}

/// Channel end the transport uses to raise events for one request.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSender {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Delivers an event. Returns `false` once the request has finished and
    /// stopped listening.
    pub fn raise(&self, event: TransportEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Factory for the client's long-lived session.
pub trait Transport {
    fn open_session(
        &self,
        user_agent: &str,
        timeouts: &Timeouts,
    ) -> Result<Arc<dyn Session>, TransportError>;
}

/// A long-lived transport session shared by every request of one client.
pub trait Session: Send + Sync {
    /// Establishes a connection to `endpoint`.
    fn connect(&self, endpoint: &EndpointKey) -> Result<Connection, TransportError>;

    /// Opens a request on `connection`. Events for it are raised on `events`.
    fn open_request(
        &self,
        connection: &Connection,
        method: Method,
        path: &str,
        events: EventSender,
    ) -> Result<RequestHandle, TransportError>;

    /// Adds one `"Name: value"` header line.
    fn add_request_headers(&self, request: &RequestHandle, header: &str)
        -> Result<(), TransportError>;

    /// Starts sending. Completion is reported with [`TransportEvent::SendComplete`].
    fn send_request(
        &self,
        request: &RequestHandle,
        extra_headers: Option<&str>,
        body: Bytes,
    ) -> Result<(), TransportError>;

    /// Starts receiving. Completion is reported with [`TransportEvent::HeadersAvailable`].
    fn receive_response(&self, request: &RequestHandle) -> Result<(), TransportError>;

    fn query_status_code(&self, request: &RequestHandle) -> Result<u16, TransportError>;

    /// Returns the raw header block, lines separated by CRLF and ending with
    /// an empty line.
    fn query_raw_headers(&self, request: &RequestHandle) -> Result<String, TransportError>;

    /// Starts a read of at most [`READ_BUFFER_SIZE`] bytes appended to the
    /// empty `buffer`. The buffer comes back in [`TransportEvent::ReadComplete`].
    ///
    /// [`READ_BUFFER_SIZE`]: crate::http::context::READ_BUFFER_SIZE
    fn read_data(&self, request: &RequestHandle, buffer: BytesMut) -> Result<(), TransportError>;

    fn close_request(&self, request: RequestHandle);

    fn close_connection(&self, connection: Connection);
}
