//! Scripted in-memory transport shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use relay_http::Timeouts;
use relay_http::http::context::READ_BUFFER_SIZE;
use relay_http::http::request::Method;
use relay_http::pool::EndpointKey;
use relay_http::transport::{
    Connection, EventSender, RequestHandle, Session, Transport, TransportError, TransportEvent,
    TransportOp,
};
use tokio::sync::{Semaphore, mpsc};

pub const OK_HEADERS: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\n";

/// How the mock answers requests for one path.
#[derive(Clone)]
pub struct Route {
    pub status: u16,
    pub headers: String,
    pub chunks: Vec<Vec<u8>>,
    /// Fail this call: synchronously for query/open calls, via an error event
    /// for send, receive and read.
    pub fail_at: Option<TransportOp>,
    /// Fail the read issued after this many chunks were delivered.
    pub fail_read_after: Option<usize>,
    /// Hold `HeadersAvailable` until a permit is added.
    pub gate: Option<Arc<Semaphore>>,
    /// Drop the event sender instead of answering `receive_response`.
    pub hang_up: bool,
    /// Answer `send_request` with `HeadersAvailable` instead of `SendComplete`.
    pub early_headers: bool,
    /// Deliver each chunk whole, ignoring the read buffer size.
    pub whole_chunks: bool,
}

impl Route {
    pub fn ok(chunks: &[&[u8]]) -> Self {
        Self {
            status: 200,
            headers: OK_HEADERS.to_string(),
            chunks: chunks.iter().map(|c| c.to_vec()).collect(),
            fail_at: None,
            fail_read_after: None,
            gate: None,
            hang_up: false,
            early_headers: false,
            whole_chunks: false,
        }
    }

    pub fn status(status: u16, chunks: &[&[u8]]) -> Self {
        Self {
            status,
            headers: format!("HTTP/1.1 {status} Whatever\r\n\r\n"),
            ..Self::ok(chunks)
        }
    }

    pub fn with_headers(mut self, headers: &str) -> Self {
        self.headers = headers.to_string();
        self
    }

    pub fn failing_at(mut self, op: TransportOp) -> Self {
        self.fail_at = Some(op);
        self
    }

    pub fn failing_read_after(mut self, chunks: usize) -> Self {
        self.fail_read_after = Some(chunks);
        self
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn hanging_up(mut self) -> Self {
        self.hang_up = true;
        self
    }

    pub fn with_early_headers(mut self) -> Self {
        self.early_headers = true;
        self
    }

    pub fn with_whole_chunks(mut self) -> Self {
        self.whole_chunks = true;
        self
    }
}

/// A request as the mock saw it.
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub method: Method,
    pub path: String,
    pub connection: u64,
    pub headers: Vec<String>,
    pub extra_headers: Option<String>,
    pub body: Bytes,
}

struct InFlight {
    route: Route,
    endpoint: EndpointKey,
    events: Option<EventSender>,
    chunks: VecDeque<Vec<u8>>,
    delivered: usize,
    sent: SentRequest,
}

#[derive(Default)]
struct MockState {
    routes: HashMap<String, Route>,
    refused: HashSet<EndpointKey>,
    refuse_next: usize,
    in_flight: HashMap<u64, InFlight>,
    open: HashMap<EndpointKey, usize>,
    peak: HashMap<EndpointKey, usize>,
    connects: usize,
    closed_connections: Vec<u64>,
    closed_requests: usize,
    sent: Vec<SentRequest>,
    user_agent: Option<String>,
}

#[derive(Default)]
pub struct MockSession {
    next_id: AtomicU64,
    state: Mutex<MockState>,
}

impl MockSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, path: &str, route: Route) {
        self.lock().routes.insert(path.to_string(), route);
    }

    pub fn refuse(&self, endpoint: EndpointKey) {
        self.lock().refused.insert(endpoint);
    }

    /// Fails the next `n` connects to any endpoint.
    pub fn refuse_next(&self, n: usize) {
        self.lock().refuse_next = n;
    }

    pub fn accept(&self, endpoint: &EndpointKey) {
        self.lock().refused.remove(endpoint);
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn open_connections(&self, endpoint: &EndpointKey) -> usize {
        self.lock().open.get(endpoint).copied().unwrap_or(0)
    }

    pub fn peak_connections(&self, endpoint: &EndpointKey) -> usize {
        self.lock().peak.get(endpoint).copied().unwrap_or(0)
    }

    pub fn closed_connections(&self) -> Vec<u64> {
        self.lock().closed_connections.clone()
    }

    pub fn closed_requests(&self) -> usize {
        self.lock().closed_requests
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.lock().sent.clone()
    }

    pub fn user_agent(&self) -> Option<String> {
        self.lock().user_agent.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn fails(&self, request: &RequestHandle, op: TransportOp) -> bool {
        self.lock()
            .in_flight
            .get(&request.id())
            .is_some_and(|r| r.route.fail_at == Some(op))
    }

    fn raise(&self, request: &RequestHandle, event: TransportEvent) {
        let state = self.lock();
        if let Some(events) = state.in_flight.get(&request.id()).and_then(|r| r.events.as_ref()) {
            events.raise(event);
        }
    }
}

fn error(op: TransportOp) -> TransportError {
    TransportError::new(op, 12029)
}

impl Session for MockSession {
    fn connect(&self, endpoint: &EndpointKey) -> Result<Connection, TransportError> {
        let mut state = self.lock();
        if state.refuse_next > 0 {
            state.refuse_next -= 1;
            return Err(error(TransportOp::Connect));
        }
        if state.refused.contains(endpoint) {
            return Err(error(TransportOp::Connect));
        }

        state.connects += 1;
        let open = state.open.entry(endpoint.clone()).or_default();
        *open += 1;
        let open = *open;
        let peak = state.peak.entry(endpoint.clone()).or_default();
        *peak = (*peak).max(open);
        drop(state);

        Ok(Connection::new(self.next_id(), endpoint.clone()))
    }

    fn open_request(
        &self,
        connection: &Connection,
        method: Method,
        path: &str,
        events: EventSender,
    ) -> Result<RequestHandle, TransportError> {
        let id = self.next_id();
        let mut state = self.lock();
        let route = state
            .routes
            .get(path)
            .cloned()
            .unwrap_or_else(|| Route::status(404, &[]));

        if route.fail_at == Some(TransportOp::OpenRequest) {
            return Err(error(TransportOp::OpenRequest));
        }

        state.in_flight.insert(
            id,
            InFlight {
                chunks: route.chunks.iter().cloned().collect(),
                route,
                endpoint: connection.endpoint().clone(),
                events: Some(events),
                delivered: 0,
                sent: SentRequest {
                    method,
                    path: path.to_string(),
                    connection: connection.id(),
                    headers: Vec::new(),
                    extra_headers: None,
                    body: Bytes::new(),
                },
            },
        );

        Ok(RequestHandle::new(id))
    }

    fn add_request_headers(&self, request: &RequestHandle, header: &str) -> Result<(), TransportError> {
        if self.fails(request, TransportOp::AddHeaders) {
            return Err(error(TransportOp::AddHeaders));
        }

        if let Some(r) = self.lock().in_flight.get_mut(&request.id()) {
            r.sent.headers.push(header.to_string());
        }
        Ok(())
    }

    fn send_request(
        &self,
        request: &RequestHandle,
        extra_headers: Option<&str>,
        body: Bytes,
    ) -> Result<(), TransportError> {
        {
            let mut state = self.lock();
            if let Some(r) = state.in_flight.get_mut(&request.id()) {
                r.sent.extra_headers = extra_headers.map(str::to_string);
                r.sent.body = body;
                let sent = r.sent.clone();
                state.sent.push(sent);
            }
        }

        let early = self
            .lock()
            .in_flight
            .get(&request.id())
            .is_some_and(|r| r.route.early_headers);

        if self.fails(request, TransportOp::SendRequest) {
            self.raise(request, TransportEvent::Error(error(TransportOp::SendRequest)));
        } else if early {
            self.raise(request, TransportEvent::HeadersAvailable);
        } else {
            self.raise(request, TransportEvent::SendComplete);
        }
        Ok(())
    }

    fn receive_response(&self, request: &RequestHandle) -> Result<(), TransportError> {
        if self.fails(request, TransportOp::ReceiveResponse) {
            self.raise(request, TransportEvent::Error(error(TransportOp::ReceiveResponse)));
            return Ok(());
        }

        let mut state = self.lock();
        let Some(r) = state.in_flight.get_mut(&request.id()) else {
            return Ok(());
        };

        if r.route.hang_up {
            r.events = None;
            return Ok(());
        }

        match (r.route.gate.clone(), r.events.clone()) {
            (Some(gate), Some(events)) => {
                tokio::spawn(async move {
                    if let Ok(permit) = gate.acquire_owned().await {
                        permit.forget();
                    }
                    events.raise(TransportEvent::HeadersAvailable);
                });
            }
            (None, Some(events)) => {
                events.raise(TransportEvent::HeadersAvailable);
            }
            _ => {}
        }
        Ok(())
    }

    fn query_status_code(&self, request: &RequestHandle) -> Result<u16, TransportError> {
        let state = self.lock();
        match state.in_flight.get(&request.id()) {
            Some(r) if r.route.fail_at != Some(TransportOp::QueryStatusCode) => Ok(r.route.status),
            _ => Err(error(TransportOp::QueryStatusCode)),
        }
    }

    fn query_raw_headers(&self, request: &RequestHandle) -> Result<String, TransportError> {
        let state = self.lock();
        match state.in_flight.get(&request.id()) {
            Some(r) if r.route.fail_at != Some(TransportOp::QueryHeaders) => Ok(r.route.headers.clone()),
            _ => Err(error(TransportOp::QueryHeaders)),
        }
    }

    fn read_data(&self, request: &RequestHandle, mut buffer: BytesMut) -> Result<(), TransportError> {
        let mut state = self.lock();
        let Some(r) = state.in_flight.get_mut(&request.id()) else {
            return Err(error(TransportOp::ReadData));
        };
        let Some(events) = r.events.clone() else {
            return Ok(());
        };

        if r.route.fail_at == Some(TransportOp::ReadData)
            || r.route.fail_read_after.is_some_and(|n| r.delivered >= n)
        {
            events.raise(TransportEvent::Error(error(TransportOp::ReadData)));
            return Ok(());
        }

        if let Some(mut chunk) = r.chunks.pop_front() {
            if chunk.len() > READ_BUFFER_SIZE && !r.route.whole_chunks {
                let rest = chunk.split_off(READ_BUFFER_SIZE);
                r.chunks.push_front(rest);
            }
            buffer.extend_from_slice(&chunk);
            r.delivered += 1;
        }

        events.raise(TransportEvent::ReadComplete(buffer));
        Ok(())
    }

    fn close_request(&self, request: RequestHandle) {
        let mut state = self.lock();
        state.in_flight.remove(&request.id());
        state.closed_requests += 1;
    }

    fn close_connection(&self, connection: Connection) {
        let mut state = self.lock();
        if let Some(open) = state.open.get_mut(connection.endpoint()) {
            *open = open.saturating_sub(1);
        }
        state.closed_connections.push(connection.id());
    }
}

pub struct MockTransport {
    pub session: Arc<MockSession>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            session: MockSession::new(),
        }
    }
}

impl Transport for MockTransport {
    fn open_session(
        &self,
        user_agent: &str,
        _timeouts: &Timeouts,
    ) -> Result<Arc<dyn Session>, TransportError> {
        self.session.lock().user_agent = Some(user_agent.to_string());
        Ok(self.session.clone())
    }
}

/// Transport that cannot open a session.
pub struct BrokenTransport;

impl Transport for BrokenTransport {
    fn open_session(&self, _: &str, _: &Timeouts) -> Result<Arc<dyn Session>, TransportError> {
        Err(error(TransportOp::OpenSession))
    }
}

pub type Outcome = (bool, Vec<u8>, usize);

/// A completion callback that forwards its arguments to a channel.
pub fn recorder() -> (
    impl FnOnce(bool, &[u8], usize) + Send + 'static,
    mpsc::UnboundedReceiver<Outcome>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback = move |success: bool, data: &[u8], length: usize| {
        let _ = tx.send((success, data.to_vec(), length));
    };
    (callback, rx)
}

pub async fn next_outcome(rx: &mut mpsc::UnboundedReceiver<Outcome>) -> Outcome {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("callback not invoked in time")
        .expect("callback dropped without being invoked")
}

/// Polls `check` until it holds or a few seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
