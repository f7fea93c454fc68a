//! Client facade
//!
//! Entry points return immediately. Each request acquires a pooled
//! connection (or queues for one), then runs as its own task driven by
//! transport events. Callbacks run on whichever runtime worker finishes the
//! request.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::http::context::{Lease, RequestContext};
use crate::http::request::{HeaderCallback, Method, RequestSpec, build_post_string};
use crate::http::response::Completion;
use crate::http::sink::{SinkTarget, WriteDevice};
use crate::pool::{Checkout, ConnectionPool, EndpointKey, PoolStats};
use crate::transport::{Connection, Session, Transport, TransportError};

/// Host, port and path (with query) of an absolute URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub host: String,
    pub port: u16,
    pub path: String,
}

/// Splits an absolute `http`/`https` URL into its request parts.
///
/// # Example
///
/// ```
/// # use relay_http::client::crack_url;
/// let parts = crack_url("http://svc.test/status?full=1").unwrap();
/// assert_eq!(parts.host, "svc.test");
/// assert_eq!(parts.port, 80);
/// assert_eq!(parts.path, "/status?full=1");
/// ```
pub fn crack_url(url: &str) -> Result<UrlParts, ClientError> {
    let parsed = Url::parse(url)?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(ClientError::UnsupportedScheme(other.to_string())),
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| ClientError::MissingHost(url.to_string()))?
        .to_string();
    let port = parsed.port_or_known_default().unwrap_or(80);

    let mut path = parsed.path().to_string();
    if let Some(query) = parsed.query() {
        path.push('?');
        path.push_str(query);
    }

    Ok(UrlParts { host, port, path })
}

/// Asynchronous HTTP client over a pluggable transport.
pub struct HttpClient {
    config: ClientConfig,
    runtime: Handle,
    session: Arc<dyn Session>,
    pool: Arc<ConnectionPool>,
}

impl HttpClient {
    /// Opens the client's transport session. Must be called from within a
    /// tokio runtime, which is used to run every request.
    pub fn new(transport: &dyn Transport, config: ClientConfig) -> Result<Self, ClientError> {
        let runtime = Handle::try_current()?;
        let session = transport
            .open_session(&config.user_agent, &config.timeouts)
            .map_err(ClientError::Session)?;
        let pool = Arc::new(ConnectionPool::new(
            Arc::clone(&session),
            config.max_connections_per_endpoint,
        ));

        info!(
            user_agent = %config.user_agent,
            max_connections = pool.max_per_endpoint(),
            "HTTP client session opened"
        );

        Ok(Self {
            config,
            runtime,
            session,
            pool,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn get(
        &self,
        host: &str,
        port: u16,
        path: &str,
        on_complete: impl FnOnce(bool, &[u8], usize) + Send + 'static,
    ) {
        let spec = RequestSpec::new(
            EndpointKey::new(host, port),
            Method::GET,
            path,
            Box::new(on_complete),
        );
        self.submit(spec);
    }

    /// Posts `fields` as an urlencoded form body.
    pub fn post_form(
        &self,
        host: &str,
        port: u16,
        path: &str,
        fields: &BTreeMap<String, String>,
        on_complete: impl FnOnce(bool, &[u8], usize) + Send + 'static,
    ) {
        self.post(
            host,
            port,
            path,
            build_post_string(fields),
            &BTreeMap::new(),
            on_complete,
            None,
        );
    }

    /// Posts a raw body with extra request headers. `on_headers`, when set,
    /// receives the response headers before `on_complete` runs.
    #[allow(clippy::too_many_arguments)]
    pub fn post(
        &self,
        host: &str,
        port: u16,
        path: &str,
        body: impl Into<Bytes>,
        headers: &BTreeMap<String, String>,
        on_complete: impl FnOnce(bool, &[u8], usize) + Send + 'static,
        on_headers: Option<HeaderCallback>,
    ) {
        let spec = RequestSpec::new(
            EndpointKey::new(host, port),
            Method::POST,
            path,
            Box::new(on_complete),
        )
        .headers(headers.clone())
        .body(body)
        .on_headers(on_headers);
        self.submit(spec);
    }

    /// Streams the response body into `name` on `device`. On success the
    /// callback gets empty data and the number of bytes written.
    ///
    /// With `existing` set the request runs on that connection, bypassing the
    /// pool, and closes it afterwards.
    #[allow(clippy::too_many_arguments)]
    pub fn file_get(
        &self,
        host: &str,
        port: u16,
        path: &str,
        device: Arc<dyn WriteDevice>,
        name: &str,
        on_complete: impl FnOnce(bool, &[u8], usize) + Send + 'static,
        existing: Option<Connection>,
    ) {
        let spec = RequestSpec::new(
            EndpointKey::new(host, port),
            Method::GET,
            path,
            Box::new(on_complete),
        )
        .sink(SinkTarget::File {
            device,
            name: name.to_string(),
        });

        match existing {
            Some(connection) => RequestContext::launch(
                &self.runtime,
                Arc::clone(&self.session),
                Arc::clone(&self.pool),
                spec,
                Lease::Direct(connection),
            ),
            None => self.submit(spec),
        }
    }

    /// GET an absolute URL.
    pub fn get_url(
        &self,
        url: &str,
        on_complete: impl FnOnce(bool, &[u8], usize) + Send + 'static,
    ) -> Result<(), ClientError> {
        let parts = crack_url(url)?;
        self.get(&parts.host, parts.port, &parts.path, on_complete);
        Ok(())
    }

    /// GET as a future resolving to the completion triple.
    pub async fn fetch(&self, host: &str, port: u16, path: &str) -> Completion {
        let (tx, rx) = oneshot::channel();
        self.get(host, port, path, move |success, data, length| {
            let _ = tx.send(Completion::new(success, data, length));
        });
        rx.await.unwrap_or_else(|_| Completion::failed())
    }

    /// Runs an arbitrary request through the pool.
    pub fn submit(&self, spec: RequestSpec) {
        let key = spec.endpoint.clone();
        let resume = self.resumer(spec);

        match self.pool.acquire_or_queue(&key, resume) {
            Checkout::Ready(outcome, resume) => resume(outcome),
            Checkout::Queued => {}
        }
    }

    pub fn pool_stats(&self, host: &str, port: u16) -> PoolStats {
        self.pool.stats(&EndpointKey::new(host, port))
    }

    /// Builds the continuation that starts `spec` once a connection is
    /// available. It holds the pool weakly since queued continuations live
    /// inside the pool.
    ///
    /// The continuation may run on the caller's thread (inside `get`) or
    /// inside a pool operation, so callbacks are always left to a runtime task.
    fn resumer(
        &self,
        spec: RequestSpec,
    ) -> impl FnOnce(Result<Connection, TransportError>) + Send + 'static {
        let runtime = self.runtime.clone();
        let session = Arc::clone(&self.session);
        let pool = Arc::downgrade(&self.pool);

        move |outcome: Result<Connection, TransportError>| match (outcome, pool.upgrade()) {
            (Ok(connection), Some(pool)) => {
                RequestContext::launch(&runtime, session, pool, spec, Lease::Pooled(connection))
            }
            (Ok(connection), None) => {
                session.close_connection(connection);
                runtime.spawn(async move { spec.fail() });
            }
            (Err(e), _) => {
                warn!(
                    endpoint = %spec.endpoint,
                    path = %spec.path,
                    error = %e,
                    "Could not obtain a connection"
                );
                runtime.spawn(async move { spec.fail() });
            }
        }
    }
}
