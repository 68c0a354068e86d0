//! Shared utilities for integration tests: raw-TCP mock backends and proxy
//! wiring.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backhaul::config::{ListenerConfig, OptionValue, ProxyOptions};
use backhaul::proxy::ProxyStats;
use backhaul::{HttpServer, ProxyEngine, ProxyHandle, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// One request as seen by a mock backend.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub head: String,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// First line of the head, e.g. `GET / HTTP/1.1`.
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim())
        })
    }
}

/// Bytes a mock backend writes back, and whether it hangs up afterwards.
#[derive(Debug, Clone)]
pub struct Reply {
    pub bytes: Vec<u8>,
    pub close: bool,
}

impl Reply {
    /// HTTP/1.1 response with Content-Length; the connection stays open.
    pub fn keep_alive(body: &str) -> Self {
        Self {
            bytes: format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nX-Backend: mock\r\n\r\n{}",
                body.len(),
                body
            )
            .into_bytes(),
            close: false,
        }
    }

    /// Body delimited by closing the connection.
    pub fn close_delimited(body: &str) -> Self {
        Self {
            bytes: format!("HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\n{}", body).into_bytes(),
            close: true,
        }
    }

    /// HTTP/1.0 response without a keep-alive token; the backend leaves the
    /// socket open and relies on the proxy to close it.
    pub fn http10(body: &str) -> Self {
        Self {
            bytes: format!("HTTP/1.0 200 OK\r\nContent-Length: {}\r\n\r\n{}", body.len(), body)
                .into_bytes(),
            close: false,
        }
    }
}

/// Handle to a running mock backend.
#[derive(Debug, Clone)]
pub struct MockBackend {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockBackend {
    pub fn uri(&self) -> String {
        self.addr.to_string()
    }

    /// Number of TCP connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start a programmable backend; `respond` builds the reply for each request.
pub async fn start_backend<F>(respond: F) -> MockBackend
where
    F: Fn(&RecordedRequest) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = MockBackend {
        addr: listener.local_addr().unwrap(),
        accepted: Arc::new(AtomicUsize::new(0)),
        requests: Arc::new(Mutex::new(Vec::new())),
    };
    let respond = Arc::new(respond);

    let state = backend.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            state.accepted.fetch_add(1, Ordering::SeqCst);
            let requests = state.requests.clone();
            let respond = respond.clone();
            tokio::spawn(serve_connection(socket, requests, respond));
        }
    });

    backend
}

async fn serve_connection<F>(
    mut socket: TcpStream,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    respond: Arc<F>,
) where
    F: Fn(&RecordedRequest) -> Reply + Send + Sync + 'static,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        while let Some(request) = take_request(&mut buf) {
            let reply = respond(&request);
            requests.lock().unwrap().push(request);
            if socket.write_all(&reply.bytes).await.is_err() {
                return;
            }
            if reply.close {
                let _ = socket.shutdown().await;
                return;
            }
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

fn take_request(buf: &mut Vec<u8>) -> Option<RecordedRequest> {
    let end = buf.windows(4).position(|w| w == b"\r\n\r\n")?;
    let head = String::from_utf8_lossy(&buf[..end]).into_owned();
    let length = head
        .lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let total = end + 4 + length;
    if buf.len() < total {
        return None;
    }
    let body = buf[end + 4..total].to_vec();
    buf.drain(..total);
    Some(RecordedRequest { head, body })
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// A running engine plus what is needed to stop it.
pub struct TestProxy {
    pub handle: ProxyHandle,
    pub shutdown: Shutdown,
    pub task: JoinHandle<()>,
}

impl TestProxy {
    pub async fn stop(self) {
        self.shutdown.trigger();
        self.task.await.unwrap();
    }
}

/// Spawn an engine configured with `options`.
pub async fn spawn_proxy(options: &[(&str, OptionValue)]) -> TestProxy {
    let shutdown = Shutdown::new();
    let (handle, task) = ProxyEngine::spawn(ProxyOptions::default(), shutdown.subscribe());
    handle
        .configure(options.iter().map(|(k, v)| (k.to_string(), v.clone())))
        .await
        .unwrap();
    TestProxy {
        handle,
        shutdown,
        task,
    }
}

/// Serve the front-end for `proxy` on an ephemeral port.
pub async fn spawn_front_end(proxy: &TestProxy, config: ListenerConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(config, proxy.handle.clone());
    let shutdown = proxy.shutdown.wait();
    tokio::spawn(async move {
        server.run(listener, shutdown).await.unwrap();
    });
    addr
}

/// Poll engine stats until `ready` holds, failing after five seconds.
pub async fn wait_for_stats<P>(proxy: &ProxyHandle, ready: P) -> ProxyStats
where
    P: Fn(&ProxyStats) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stats = proxy.stats().await.unwrap();
        if ready(&stats) {
            return stats;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached, last stats: {stats:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
