//! Per-request state machine
//!
//! A [`RequestContext`] is created once a request holds a connection. It is
//! moved into its own task, consumes transport events in delivery order, and
//! is consumed by [`RequestContext::finish`], the single finalization path
//! shared by success and every kind of failure.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, warn};

use crate::error::RequestError;
use crate::http::parser::{HeaderMap, parse_raw_headers};
use crate::http::request::{CompletionCallback, HeaderCallback, Method, RequestSpec};
use crate::http::sink::{OutputSink, SinkTarget};
use crate::pool::{ConnectionPool, EndpointKey};
use crate::transport::{Connection, EventSender, RequestHandle, Session, TransportEvent};

/// Size of each read issued to the transport.
pub const READ_BUFFER_SIZE: usize = 32 * 1024;

const HTTP_STATUS_OK: u16 = 200;

/// Lifecycle of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Created,
    Sent,
    AwaitingHeaders,
    Reading,
    Completed,
    Failed,
}

/// Where a request's connection came from and where it goes afterwards.
#[derive(Debug)]
pub(crate) enum Lease {
    /// Checked out of the pool; released back to it.
    Pooled(Connection),
    /// Supplied by the caller; closed directly.
    Direct(Connection),
}

impl Lease {
    fn connection(&self) -> &Connection {
        match self {
            Lease::Pooled(c) | Lease::Direct(c) => c,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Done,
}

/// The parts of a request that are spent while starting it.
struct Outbound {
    method: Method,
    header_lines: Vec<String>,
    extra_headers: Option<&'static str>,
    body: Bytes,
    sink: SinkTarget,
}

pub(crate) struct RequestContext {
    session: Arc<dyn Session>,
    pool: Arc<ConnectionPool>,
    endpoint: EndpointKey,
    path: String,
    url: String,
    state: RequestState,
    /// `None` while the transport holds it for a read.
    buffer: Option<BytesMut>,
    received: usize,
    sink: Option<OutputSink>,
    on_complete: CompletionCallback,
    on_headers: Option<HeaderCallback>,
    lease: Lease,
    request: Option<RequestHandle>,
}

impl RequestContext {
    /// Starts `spec` on `lease` in a new task.
    pub(crate) fn launch(
        runtime: &Handle,
        session: Arc<dyn Session>,
        pool: Arc<ConnectionPool>,
        spec: RequestSpec,
        lease: Lease,
    ) {
        let outbound = Outbound {
            method: spec.method,
            header_lines: spec.header_lines(),
            extra_headers: spec.extra_headers(),
            body: spec.body,
            sink: spec.sink,
        };

        let ctx = RequestContext {
            session,
            pool,
            url: spec.endpoint.url(&spec.path),
            endpoint: spec.endpoint,
            path: spec.path,
            state: RequestState::Created,
            buffer: Some(BytesMut::with_capacity(READ_BUFFER_SIZE)),
            received: 0,
            sink: None,
            on_complete: spec.on_complete,
            on_headers: spec.on_headers,
            lease,
            request: None,
        };

        runtime.spawn(ctx.run(outbound));
    }

    async fn run(mut self, outbound: Outbound) {
        let (sender, mut events) = EventSender::channel();

        let result = match self.begin(outbound, sender).await {
            Ok(()) => self.drive(&mut events).await,
            Err(e) => Err(e),
        };

        // Stop accepting late events before tearing down.
        events.close();
        self.finish(result).await;
    }

    async fn begin(&mut self, outbound: Outbound, sender: EventSender) -> Result<(), RequestError> {
        let destination = outbound.sink.destination().to_string();
        let sink = OutputSink::open(outbound.sink)
            .await
            .map_err(|source| RequestError::SinkCreate {
                name: destination,
                source,
            })?;
        self.sink = Some(sink);

        let request = self.session.open_request(
            self.lease.connection(),
            outbound.method,
            &self.path,
            sender,
        )?;
        let request = self.request.insert(request);

        for line in &outbound.header_lines {
            self.session.add_request_headers(request, line)?;
        }

        self.session
            .send_request(request, outbound.extra_headers, outbound.body)?;
        self.state = RequestState::Sent;

        debug!(method = outbound.method.as_str(), url = %self.url, "Request sent");
        Ok(())
    }

    async fn drive(
        &mut self,
        events: &mut UnboundedReceiver<TransportEvent>,
    ) -> Result<(), RequestError> {
        loop {
            let event = events.recv().await.ok_or(RequestError::EventsClosed)?;

            if self.on_event(event).await? == Flow::Done {
                return Ok(());
            }
        }
    }

    async fn on_event(&mut self, event: TransportEvent) -> Result<Flow, RequestError> {
        match (self.state, event) {
            (_, TransportEvent::Error(e)) => Err(e.into()),

            (RequestState::Sent, TransportEvent::SendComplete) => {
                self.session.receive_response(self.handle()?)?;
                self.state = RequestState::AwaitingHeaders;
                Ok(Flow::Continue)
            }

            (RequestState::AwaitingHeaders, TransportEvent::HeadersAvailable) => {
                let status = self.session.query_status_code(self.handle()?)?;
                if status != HTTP_STATUS_OK {
                    return Err(RequestError::Status(status));
                }

                self.state = RequestState::Reading;
                self.issue_read()?;
                Ok(Flow::Continue)
            }

            (RequestState::Reading, TransportEvent::ReadComplete(chunk)) => {
                if chunk.is_empty() {
                    return Ok(Flow::Done);
                }
                if chunk.len() > READ_BUFFER_SIZE {
                    return Err(RequestError::OversizedRead(chunk.len()));
                }

                if let Some(sink) = self.sink.as_mut() {
                    sink.append(&chunk).await.map_err(RequestError::SinkWrite)?;
                }
                self.received += chunk.len();

                self.buffer = Some(chunk);
                self.issue_read()?;
                Ok(Flow::Continue)
            }

            (state, event) => Err(RequestError::UnexpectedEvent {
                event: event.name(),
                state,
            }),
        }
    }

    fn issue_read(&mut self) -> Result<(), RequestError> {
        let mut buffer = self
            .buffer
            .take()
            .unwrap_or_else(|| BytesMut::with_capacity(READ_BUFFER_SIZE));
        buffer.clear();
        buffer.reserve(READ_BUFFER_SIZE);

        self.session.read_data(self.handle()?, buffer)?;
        Ok(())
    }

    fn handle(&self) -> Result<&RequestHandle, RequestError> {
        self.request.as_ref().ok_or(RequestError::UnexpectedEvent {
            event: "request",
            state: self.state,
        })
    }

    /// Runs exactly once per request. Closes the sink, delivers headers and
    /// the result, then hands back the connection and the request handle.
    async fn finish(mut self, result: Result<(), RequestError>) {
        let mut success = result.is_ok();
        if let Err(e) = &result {
            self.log_failure(e);
        }

        let to_file = self.sink.as_ref().is_some_and(OutputSink::is_file);
        let finalized = match self.sink.take() {
            Some(sink) => Some(sink.finalize().await),
            None => None,
        };
        let body = match finalized {
            Some(Ok(body)) => body,
            Some(Err(e)) => {
                error!(url = %self.url, error = %e, "Failed to close destination");
                success = false;
                Bytes::new()
            }
            None => Bytes::new(),
        };

        self.state = if success {
            RequestState::Completed
        } else {
            RequestState::Failed
        };

        if let Some(on_headers) = self.on_headers.take() {
            on_headers(&self.response_headers());
        }

        match (success, to_file) {
            (true, true) => (self.on_complete)(true, &[], self.received),
            (true, false) => (self.on_complete)(true, &body, body.len()),
            (false, _) => (self.on_complete)(false, &[], 0),
        }

        match self.lease {
            Lease::Pooled(connection) => self.pool.release(&self.endpoint, connection),
            Lease::Direct(connection) => self.session.close_connection(connection),
        }

        if let Some(request) = self.request.take() {
            self.session.close_request(request);
        }
    }

    fn response_headers(&self) -> HeaderMap {
        let Some(request) = self.request.as_ref() else {
            return HeaderMap::new();
        };

        match self.session.query_raw_headers(request) {
            Ok(raw) => parse_raw_headers(&raw),
            Err(e) => {
                debug!(url = %self.url, error = %e, "No response headers available");
                HeaderMap::new()
            }
        }
    }

    fn log_failure(&self, err: &RequestError) {
        match err {
            RequestError::Transport(e) => warn!(
                endpoint = %self.endpoint,
                path = %self.path,
                op = %e.op,
                code = e.code,
                "{} on {} failed - error code {}",
                e.op,
                self.url,
                e.code
            ),
            RequestError::Status(status) => {
                debug!(url = %self.url, status = *status, "Request rejected by server")
            }
            RequestError::SinkCreate { .. } => {
                error!(url = %self.url, error = %err, "Request abandoned")
            }
            _ => warn!(url = %self.url, state = ?self.state, error = %err, "Request failed"),
        }
    }
}
