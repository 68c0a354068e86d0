//! End-to-end tests of the engine against raw-TCP mock backends.

use axum::http::{Method, StatusCode};
use backhaul::config::OptionValue;
use backhaul::proxy::{ConnectionInfo, ProxyRequest};

mod common;

fn get(target: &str) -> ProxyRequest {
    ProxyRequest::new(Method::GET, target)
}

#[tokio::test]
async fn keep_alive_connection_serves_sequential_requests() {
    let backend = common::start_backend(|_| common::Reply::keep_alive("hello")).await;
    let proxy = common::spawn_proxy(&[("lowWaterConnectionMin", OptionValue::Int(1))]).await;
    proxy.handle.add_backend(&backend.uri()).await.unwrap();

    common::wait_for_stats(&proxy.handle, |s| s.backends[0].idle == 1).await;

    for n in 0..3 {
        let response = proxy.handle.submit(get(&format!("/item/{n}"))).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(&response.body[..], b"hello");
        assert_eq!(response.headers["x-backend"], "mock");
        assert!(response.headers.get("content-length").is_none());
    }

    assert_eq!(backend.accepted(), 1);
    let requests = backend.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].request_line(), "GET /item/2 HTTP/1.1");
    assert_eq!(requests[0].header("connection"), Some("keep-alive"));

    let stats = proxy.handle.stats().await.unwrap();
    assert_eq!(stats.total_pending_requests, 0);
    assert_eq!(stats.backends[0].idle, 1);
    proxy.stop().await;
}

#[tokio::test]
async fn close_delimited_body_is_delivered() {
    let backend = common::start_backend(|_| common::Reply::close_delimited("streamed to eof")).await;
    let proxy = common::spawn_proxy(&[("lowWaterConnectionMin", OptionValue::Int(0))]).await;
    proxy.handle.add_backend(&backend.uri()).await.unwrap();

    let response = proxy.handle.submit(get("/")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(&response.body[..], b"streamed to eof");

    common::wait_for_stats(&proxy.handle, |s| s.backends[0].connections == 0).await;
    proxy.stop().await;
}

#[tokio::test]
async fn http10_response_is_not_reused() {
    let backend = common::start_backend(|_| common::Reply::http10("old")).await;
    let proxy = common::spawn_proxy(&[("lowWaterConnectionMin", OptionValue::Int(0))]).await;
    proxy.handle.add_backend(&backend.uri()).await.unwrap();

    for _ in 0..2 {
        let response = proxy.handle.submit(get("/")).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(&response.body[..], b"old");
    }

    assert_eq!(backend.accepted(), 2);
    proxy.stop().await;
}

#[tokio::test]
async fn requests_alternate_between_backends() {
    let first = common::start_backend(|_| common::Reply::keep_alive("first")).await;
    let second = common::start_backend(|_| common::Reply::keep_alive("second")).await;
    let proxy = common::spawn_proxy(&[("lowWaterConnectionMin", OptionValue::Int(1))]).await;
    proxy.handle.add_backend(&first.uri()).await.unwrap();
    proxy.handle.add_backend(&second.uri()).await.unwrap();

    common::wait_for_stats(&proxy.handle, |s| s.backends.iter().all(|b| b.idle == 1)).await;

    let mut bodies = Vec::new();
    for _ in 0..4 {
        bodies.push(proxy.handle.submit(get("/")).await.body);
    }
    assert_eq!(bodies, ["first", "second", "first", "second"]);
    proxy.stop().await;
}

#[tokio::test]
async fn pass_headers_are_resolved_per_request() {
    let backend = common::start_backend(|_| common::Reply::keep_alive("ok")).await;
    let pass_headers: OptionValue = [
        ("X-Forwarded-For", "$remoteAddr"),
        ("Host", "$host"),
        ("X-Proxy", "backhaul"),
    ]
    .into_iter()
    .collect();
    let proxy = common::spawn_proxy(&[
        ("lowWaterConnectionMin", OptionValue::Int(0)),
        ("proxyPassHeaders", pass_headers),
    ])
    .await;
    proxy.handle.add_backend(&backend.uri()).await.unwrap();

    let request = ProxyRequest::new(Method::POST, "/submit")
        .body("payload")
        .connection(ConnectionInfo {
            server_name: "proxy.local".into(),
            server_addr: "10.0.0.1".into(),
            server_port: 8080,
            remote_addr: "192.168.1.9".into(),
        });
    let response = proxy.handle.submit(request).await;
    assert_eq!(response.status, StatusCode::OK);

    let recorded = &backend.requests()[0];
    assert_eq!(recorded.request_line(), "POST /submit HTTP/1.1");
    assert_eq!(recorded.header("x-forwarded-for"), Some("192.168.1.9"));
    assert_eq!(recorded.header("host"), Some("proxy.local:8080"));
    assert_eq!(recorded.header("x-proxy"), Some("backhaul"));
    assert_eq!(recorded.header("content-length"), Some("7"));
    assert_eq!(recorded.body, b"payload");
    proxy.stop().await;
}

#[tokio::test]
async fn unreachable_backend_queues_until_shutdown() {
    let dead = common::unused_addr().await;
    let proxy = common::spawn_proxy(&[
        ("lowWaterConnectionMin", OptionValue::Int(0)),
        ("maxPendingRequests", OptionValue::Int(1)),
    ])
    .await;
    proxy.handle.add_backend(&dead.to_string()).await.unwrap();

    let queued = proxy.handle.submit(get("/"));
    let stats = common::wait_for_stats(&proxy.handle, |s| {
        s.backends[0].consecutive_connect_failures >= 1
    })
    .await;
    assert_eq!(stats.queued_requests, 1);
    assert_eq!(stats.total_pending_requests, 1);

    let over_limit = proxy.handle.submit(get("/")).await;
    assert_eq!(over_limit.status, StatusCode::SERVICE_UNAVAILABLE);

    let handle = proxy.handle.clone();
    proxy.stop().await;
    assert_eq!(queued.await.status, StatusCode::SERVICE_UNAVAILABLE);

    let after_stop = handle.submit(get("/")).await;
    assert_eq!(after_stop.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn no_backends_answers_503() {
    let proxy = common::spawn_proxy(&[]).await;
    let response = proxy.handle.submit(get("/")).await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.reason, "Service Unavailable");
    proxy.stop().await;
}
