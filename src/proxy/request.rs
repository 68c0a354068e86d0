//! Inbound request descriptor handed to the dispatcher.

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use bytes::Bytes;

/// Metadata about the client connection a request arrived on.
///
/// These values back the `$host`, `$serverName`, `$serverAddr`,
/// `$serverPort` and `$remoteAddr` pass-header variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub server_name: String,
    pub server_addr: String,
    pub server_port: u16,
    pub remote_addr: String,
}

/// A request waiting to be forwarded upstream.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Request target as sent on the request line (path and query).
    pub target: String,
    pub headers: HeaderMap,
    /// Fully buffered body; its length becomes the upstream Content-Length.
    pub body: Option<Bytes>,
    pub connection: ConnectionInfo,
}

impl ProxyRequest {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HeaderMap::new(),
            body: None,
            connection: ConnectionInfo::default(),
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn connection(mut self, connection: ConnectionInfo) -> Self {
        self.connection = connection;
        self
    }
}
