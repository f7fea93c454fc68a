use std::io;

use crate::http::context::RequestState;
use crate::transport::TransportError;

/// Why a request ended in the failed state.
///
/// Never surfaced to callers; it is logged and collapsed into the callback's
/// `success` flag.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unexpected status code {0}")]
    Status(u16),

    #[error("failed to create destination {name}: {source}")]
    SinkCreate {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write response body: {0}")]
    SinkWrite(#[source] io::Error),

    #[error("transport returned {0} bytes for a single read")]
    OversizedRead(usize),

    #[error("unexpected {event} event while {state:?}")]
    UnexpectedEvent {
        event: &'static str,
        state: RequestState,
    },

    #[error("transport stopped delivering events")]
    EventsClosed,
}

/// Errors from client construction and URL helpers.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("no tokio runtime available: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),

    #[error("failed to open transport session: {0}")]
    Session(#[source] TransportError),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("url has no host: {0}")]
    MissingHost(String),

    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
}
