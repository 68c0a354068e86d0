//! HTTP front-end.
//!
//! # Responsibilities
//! - Create the Axum router with a single catch-all handler
//! - Wire up middleware (request ID, tracing)
//! - Buffer inbound bodies up to the configured limit
//! - Hand requests to the proxy engine and relay its answer
//!
//! # Design Decisions
//! - Bodies are fully buffered; the upstream request always carries an exact
//!   Content-Length
//! - Server name comes from config, falling back to the Host header

use std::future::Future;
use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ListenerConfig;
use crate::proxy::{ConnectionInfo, ProxyHandle, ProxyRequest, ProxyResponse};

/// Application state injected into handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub proxy: ProxyHandle,
    pub server_name: Option<String>,
    pub local_addr: SocketAddr,
    pub max_body_size: usize,
}

/// Front-end HTTP server for the reverse proxy.
#[derive(Debug)]
pub struct HttpServer {
    config: ListenerConfig,
    proxy: ProxyHandle,
}

impl HttpServer {
    pub fn new(config: ListenerConfig, proxy: ProxyHandle) -> Self {
        Self { config, proxy }
    }

    /// Build the Axum router with all middleware layers.
    pub fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Accept connections on `listener` until `shutdown` resolves.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        tracing::info!(address = %local_addr, "HTTP server starting");

        let state = AppState {
            proxy: self.proxy,
            server_name: self.config.server_name,
            local_addr,
            max_body_size: self.config.max_body_size,
        };
        let app = Self::build_router(state).into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Forward one inbound request through the engine.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let (parts, body) = request.into_parts();

    if declared_length(&parts.headers).is_some_and(|len| len > state.max_body_size) {
        tracing::debug!(request_id = %request_id, "Request body exceeds limit");
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    }
    let body = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(request_id = %request_id, error = %e, "Request body rejected");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let server_name = state
        .server_name
        .clone()
        .or_else(|| {
            parts
                .headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(|host| strip_port(host).to_string())
        })
        .unwrap_or_else(|| state.local_addr.ip().to_string());

    let connection = ConnectionInfo {
        server_name,
        server_addr: state.local_addr.ip().to_string(),
        server_port: state.local_addr.port(),
        remote_addr: remote.ip().to_string(),
    };

    let mut forwarded = ProxyRequest::new(parts.method.clone(), target).connection(connection);
    forwarded.headers = parts.headers;
    if !body.is_empty() || expects_body(&parts.method) {
        forwarded.body = Some(body);
    }

    tracing::debug!(
        request_id = %request_id,
        method = %forwarded.method,
        target = %forwarded.target,
        "Proxying request"
    );

    let response = state.proxy.submit(forwarded).await;
    tracing::debug!(request_id = %request_id, status = response.status.as_u16(), "Relaying response");
    into_http_response(response)
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn expects_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Drop a trailing `:port` from a Host header value, leaving IPv6 brackets.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

fn into_http_response(response: ProxyResponse) -> Response {
    let mut http = Response::new(Body::from(response.body));
    *http.status_mut() = response.status;
    *http.headers_mut() = response.headers;
    http
}
