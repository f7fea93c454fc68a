use std::collections::BTreeMap;

use bytes::Bytes;

use crate::http::sink::SinkTarget;
use crate::pool::EndpointKey;

/// Content type sent with every POST unless the caller sets one.
pub const FORM_CONTENT_TYPE: &str = "Content-Type: application/x-www-form-urlencoded; charset=utf-8";

/// HTTP request methods issued by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Submit a body
    POST,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
        }
    }
}

/// Callback invoked exactly once per request with `(success, data, length)`.
///
/// For memory-backed requests `data` holds the body and `length` its size.
/// For file-backed requests `data` is empty and `length` is the number of
/// bytes written. Failures always report `(false, &[], 0)`.
pub type CompletionCallback = Box<dyn FnOnce(bool, &[u8], usize) + Send>;

/// Callback invoked at most once, before the completion callback, with the
/// parsed response headers.
pub type HeaderCallback = Box<dyn FnOnce(&crate::http::parser::HeaderMap) + Send>;

/// Serializes form fields as `key=urlencode(value)&...` in key order.
///
/// # Example
///
/// ```
/// # use std::collections::BTreeMap;
/// # use relay_http::http::request::build_post_string;
/// let mut fields = BTreeMap::new();
/// fields.insert("a".to_string(), "1".to_string());
/// fields.insert("b".to_string(), "two words".to_string());
/// assert_eq!(build_post_string(&fields), "a=1&b=two%20words");
/// ```
pub fn build_post_string(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Everything needed to start (or restart, after queueing) one request.
pub struct RequestSpec {
    pub endpoint: EndpointKey,
    pub method: Method,
    pub path: String,
    /// Caller headers, added one `"Name: value"` line at a time.
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    pub sink: SinkTarget,
    pub on_complete: CompletionCallback,
    pub on_headers: Option<HeaderCallback>,
}

impl RequestSpec {
    pub fn new(
        endpoint: EndpointKey,
        method: Method,
        path: impl Into<String>,
        on_complete: CompletionCallback,
    ) -> Self {
        Self {
            endpoint,
            method,
            path: path.into(),
            headers: BTreeMap::new(),
            body: Bytes::new(),
            sink: SinkTarget::Memory,
            on_complete,
            on_headers: None,
        }
    }

    pub fn headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn sink(mut self, sink: SinkTarget) -> Self {
        self.sink = sink;
        self
    }

    pub fn on_headers(mut self, on_headers: Option<HeaderCallback>) -> Self {
        self.on_headers = on_headers;
        self
    }

    /// Header lines handed to the transport, in key order.
    pub fn header_lines(&self) -> Vec<String> {
        self.headers
            .iter()
            .map(|(name, value)| format!("{}: {}", name, value))
            .collect()
    }

    /// Extra headers passed with the send call.
    pub fn extra_headers(&self) -> Option<&'static str> {
        let caller_sets_type = self
            .headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case("Content-Type"));

        match self.method {
            Method::POST if !caller_sets_type => Some(FORM_CONTENT_TYPE),
            _ => None,
        }
    }

    /// Fails the request before any transport work, honoring the
    /// exactly-once callback contract.
    pub(crate) fn fail(self) {
        if let Some(on_headers) = self.on_headers {
            on_headers(&Default::default());
        }
        (self.on_complete)(false, &[], 0);
    }
}
