//! Header translation between the client side and upstream connections.
//!
//! [`build_request_head`] serializes the outbound request line and header
//! block: transport framing headers from the client are dropped and
//! recomputed, `Connection: keep-alive` is forced, and configured
//! pass-headers are merged last. [`strip_transport_headers`] and
//! [`should_close_after`] handle the response side.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Version};
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ConfigurationError;
use crate::proxy::request::{ConnectionInfo, ProxyRequest};

/// Response headers that only describe the upstream connection's framing.
const TRANSPORT_HEADERS: [&str; 4] = ["keep-alive", "connection", "transfer-encoding", "content-length"];

/// Symbolic values available to `proxyPassHeaders`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyVariable {
    /// Server name, with `:port` appended unless the port is 80 or 443.
    Host,
    ServerName,
    ServerAddr,
    ServerPort,
    RemoteAddr,
}

impl ProxyVariable {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "$host" => Some(Self::Host),
            "$serverName" => Some(Self::ServerName),
            "$serverAddr" => Some(Self::ServerAddr),
            "$serverPort" => Some(Self::ServerPort),
            "$remoteAddr" => Some(Self::RemoteAddr),
            _ => None,
        }
    }

    pub fn resolve(&self, info: &ConnectionInfo) -> String {
        match self {
            Self::Host if info.server_port == 80 || info.server_port == 443 => {
                info.server_name.clone()
            }
            Self::Host => format!("{}:{}", info.server_name, info.server_port),
            Self::ServerName => info.server_name.clone(),
            Self::ServerAddr => info.server_addr.clone(),
            Self::ServerPort => info.server_port.to_string(),
            Self::RemoteAddr => info.remote_addr.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassValue {
    Variable(ProxyVariable),
    Literal(HeaderValue),
}

/// Compiled `proxyPassHeaders` option.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyPassHeaders {
    entries: Vec<(HeaderName, PassValue)>,
}

impl ProxyPassHeaders {
    /// Compile `name → value` pairs. Names are case-insensitive; a value that
    /// is not a known variable is sent literally.
    pub fn parse<I, K, V>(entries: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut compiled: Vec<(HeaderName, PassValue)> = Vec::new();
        for (name, value) in entries {
            let (name, value) = (name.as_ref(), value.as_ref());
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                ConfigurationError::invalid_value(
                    "proxyPassHeaders",
                    format!("invalid header name {name:?}"),
                )
            })?;
            let pass = match ProxyVariable::parse(value) {
                Some(variable) => PassValue::Variable(variable),
                None => PassValue::Literal(HeaderValue::from_str(value).map_err(|_| {
                    ConfigurationError::invalid_value(
                        "proxyPassHeaders",
                        format!("invalid value for header {name:?}"),
                    )
                })?),
            };

            // Later entries win, matching case-insensitive key folding.
            compiled.retain(|(existing, _)| *existing != header_name);
            compiled.push((header_name, pass));
        }
        Ok(Self { entries: compiled })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Resolve against `info` and overwrite same-named headers.
    pub fn apply(&self, headers: &mut HeaderMap, info: &ConnectionInfo) {
        for (name, pass) in &self.entries {
            let value = match pass {
                PassValue::Literal(value) => value.clone(),
                PassValue::Variable(variable) => match HeaderValue::from_str(&variable.resolve(info)) {
                    Ok(value) => value,
                    Err(_) => {
                        tracing::warn!(header = %name, variable = ?variable, "Pass-header value is not a valid header value, skipping");
                        continue;
                    }
                },
            };
            headers.insert(name.clone(), value);
        }
    }
}

/// Serialize the upstream request line and header block.
pub fn build_request_head(request: &ProxyRequest, pass_headers: &ProxyPassHeaders) -> Bytes {
    let mut headers = request.headers.clone();
    headers.remove(header::EXPECT);
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::TRANSFER_ENCODING);
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));

    if let Some(body) = &request.body {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    }

    if !pass_headers.is_empty() {
        pass_headers.apply(&mut headers, &request.connection);
    }

    let target = if request.target.is_empty() {
        "/"
    } else {
        request.target.as_str()
    };

    let mut head = BytesMut::with_capacity(128 + headers.len() * 32);
    head.put_slice(request.method.as_str().as_bytes());
    head.put_u8(b' ');
    head.put_slice(target.as_bytes());
    head.put_slice(b" HTTP/1.1\r\n");
    for (name, value) in headers.iter() {
        head.put_slice(name.as_str().as_bytes());
        head.put_slice(b": ");
        head.put_slice(value.as_bytes());
        head.put_slice(b"\r\n");
    }
    head.put_slice(b"\r\n");
    head.freeze()
}

/// Remove upstream framing headers before a response reaches the caller.
pub fn strip_transport_headers(headers: &mut HeaderMap) {
    for name in TRANSPORT_HEADERS {
        headers.remove(name);
    }
}

/// Keep-alive decision for a decoded upstream response.
pub fn should_close_after(version: Version, headers: &HeaderMap) -> bool {
    match version {
        Version::HTTP_11 => connection_has_token(headers, "close"),
        Version::HTTP_10 => !connection_has_token(headers, "keep-alive"),
        _ => true,
    }
}

fn connection_has_token(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|candidate| candidate.trim().eq_ignore_ascii_case(token))
}
