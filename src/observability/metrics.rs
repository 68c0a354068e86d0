//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Install the Prometheus recorder behind the `metrics` facade
//! - Serve the scrape endpoint
//!
//! # Metrics
//! - `proxy_requests_total` (counter): admissions and rejections by `outcome`
//! - `proxy_responses_total` (counter): upstream responses by `status`
//! - `proxy_pending_requests` (gauge): outstanding plus queued requests
//! - `proxy_backend_connections` (gauge): pool size per `backend`
//! - `proxy_connect_failures_total` (counter): failed connects per `backend`
//! - `proxy_upstream_errors_total` (counter): requests failed with 502 by `kind`
//!
//! # Design Decisions
//! - The dispatcher records through the facade; without a recorder the calls
//!   are no-ops, so tests need no setup

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Serve `/metrics` on `addr` until the task is dropped.
pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    axum::serve(listener, app.into_make_service()).await
}

/// Install the recorder and spawn the scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    let handle = install_recorder()?;
    tokio::spawn(async move {
        if let Err(e) = serve_metrics(handle, addr).await {
            tracing::error!(error = %e, address = %addr, "Metrics endpoint failed");
        }
    });
    Ok(())
}
