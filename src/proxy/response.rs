//! Responses delivered to callers.
//!
//! Either an upstream response with its framing headers removed, or one of
//! the two canned failures the proxy synthesizes itself.

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;

use crate::codec::DecodedResponse;
use crate::proxy::headers::strip_transport_headers;

const BAD_GATEWAY_BODY: &str = "<html><body><h1>502 Bad Gateway</h1></body></html>";
const SERVICE_UNAVAILABLE_BODY: &str = "<html><body><h1>503 Service Unavailable</h1></body></html>";

/// The eventual result of a submitted request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    /// Canned response for upstream failures.
    pub fn bad_gateway() -> Self {
        Self::canned(StatusCode::BAD_GATEWAY, BAD_GATEWAY_BODY)
    }

    /// Canned response for capacity rejections.
    pub fn service_unavailable() -> Self {
        Self::canned(StatusCode::SERVICE_UNAVAILABLE, SERVICE_UNAVAILABLE_BODY)
    }

    fn canned(status: StatusCode, body: &'static str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        Self {
            status,
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    pub(crate) fn from_upstream(decoded: DecodedResponse) -> Self {
        let mut headers = decoded.headers;
        strip_transport_headers(&mut headers);
        Self {
            status: decoded.status,
            reason: decoded.reason,
            headers,
            body: decoded.body,
        }
    }
}
