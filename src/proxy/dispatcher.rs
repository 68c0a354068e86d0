//! Proxy dispatcher: admission, selection, connection lifecycle.
//!
//! # Responsibilities
//! - Admit or reject submissions against the global pending cap
//! - Pick backends round-robin and acquire, open or queue for a connection
//! - Drive each connection through its state machine on reactor events
//! - Decide keep-alive vs close after every response
//! - Heal pools that fall below the low-water mark and retry failed connects
//!
//! # Design Decisions
//! - Synchronous and single-threaded; every entry point runs to completion on
//!   the engine task, so nothing here needs a lock
//! - All I/O and scheduling goes through the injected [`Reactor`]
//! - Every submission's [`Completion`] is settled exactly once, with an
//!   upstream response, a 502 or a 503

use std::collections::{HashMap, VecDeque};
use std::io;

use axum::http::StatusCode;

use crate::codec::{DecodedResponse, RequestWriter, ResponseDecoder};
use crate::config::options::{OptionValue, ProxyOptions};
use crate::error::ConfigurationError;
use crate::load_balancer::backend::{parse_backend_uri, Backend, BackendAddr, BackendId};
use crate::load_balancer::pool::BackendRegistry;
use crate::net::connection::{Connection, ConnectionId, ConnectionIdAllocator, ConnectionState};
use crate::net::reactor::{Deferred, Reactor};
use crate::proxy::completion::Completion;
use crate::proxy::headers::{build_request_head, should_close_after};
use crate::proxy::request::ProxyRequest;
use crate::proxy::response::ProxyResponse;
use crate::resilience::backoff::connect_retry_delay;

#[derive(Debug)]
struct QueuedRequest {
    request: ProxyRequest,
    completion: Completion,
}

/// Why a connection is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unload {
    Eof,
    ReadFault,
    WriteFault,
    DecodeFault,
    Unsolicited,
    NotReusable,
}

impl Unload {
    fn as_str(self) -> &'static str {
        match self {
            Unload::Eof => "eof",
            Unload::ReadFault => "read_fault",
            Unload::WriteFault => "write_fault",
            Unload::DecodeFault => "decode_fault",
            Unload::Unsolicited => "unsolicited",
            Unload::NotReusable => "not_reusable",
        }
    }
}

/// Snapshot of one backend's pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendStats {
    pub identity: String,
    pub connections: usize,
    pub idle: usize,
    pub consecutive_connect_failures: u32,
}

/// Snapshot of dispatcher counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyStats {
    pub total_pending_requests: usize,
    pub queued_requests: usize,
    pub backends: Vec<BackendStats>,
}

/// The proxy core, generic over its event loop.
#[derive(Debug)]
pub struct Dispatcher<R: Reactor> {
    reactor: R,
    options: ProxyOptions,
    registry: BackendRegistry,
    owners: HashMap<ConnectionId, BackendId>,
    queue: VecDeque<QueuedRequest>,
    total_pending: usize,
    ids: ConnectionIdAllocator,
}

impl<R: Reactor> Dispatcher<R> {
    pub fn new(reactor: R, options: ProxyOptions) -> Self {
        Self {
            reactor,
            options,
            registry: BackendRegistry::new(),
            owners: HashMap::new(),
            queue: VecDeque::new(),
            total_pending: 0,
            ids: ConnectionIdAllocator::default(),
        }
    }

    // --- Configuration ---

    /// Apply several options at once; nothing changes if any of them fails.
    pub fn configure<I, K>(&mut self, options: I) -> Result<(), ConfigurationError>
    where
        I: IntoIterator<Item = (K, OptionValue)>,
        K: AsRef<str>,
    {
        let mut updated = self.options.clone();
        updated.set_all(options)?;
        self.apply_options(updated);
        tracing::info!(
            low_water = self.options.low_water_connection_min,
            hi_water = self.options.hi_water_connection_max,
            max_pending = self.options.max_pending_requests,
            pass_headers = self.options.proxy_pass_headers.len(),
            "Proxy options applied"
        );
        Ok(())
    }

    pub fn set_option(&mut self, key: &str, value: OptionValue) -> Result<(), ConfigurationError> {
        self.configure([(key, value)])
    }

    /// Replace every option wholesale.
    pub fn replace_options(&mut self, options: ProxyOptions) {
        self.apply_options(options);
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    /// Register a backend by URI. Re-adding a known identity is a no-op.
    pub fn add_backend(&mut self, uri: &str) -> Result<BackendId, ConfigurationError> {
        let addr = parse_backend_uri(uri)?;
        Ok(self.add_backend_addr(addr))
    }

    pub fn add_backend_addr(&mut self, addr: BackendAddr) -> BackendId {
        let (id, inserted) = self.registry.add(addr);
        if inserted {
            if let Some(backend) = self.registry.get(id) {
                tracing::info!(backend = %backend.identity(), "Backend registered");
                record_backend_gauge(backend);
            }
            self.reactor.immediately(Deferred::InitialConnect(id));
        }
        id
    }

    // --- Submission ---

    /// Forward `request`; `completion` is settled exactly once.
    pub fn submit(&mut self, request: ProxyRequest, completion: Completion) {
        if self.registry.is_empty() {
            reject(completion, "no_backends");
            return;
        }
        if self.total_pending >= self.options.max_pending_requests {
            reject(completion, "pending_limit");
            return;
        }
        let Some(backend_id) = self.registry.next() else {
            reject(completion, "no_backends");
            return;
        };

        let idle = self
            .registry
            .get_mut(backend_id)
            .and_then(Backend::take_available);
        if let Some(conn_id) = idle {
            self.add_pending();
            metrics::counter!("proxy_requests_total", "outcome" => "reused").increment(1);
            self.hand_off(conn_id, request, completion);
            return;
        }

        if !self.has_room(backend_id) {
            if let Some(backend) = self.registry.get(backend_id) {
                tracing::debug!(backend = %backend.identity(), "Backend saturated, rejecting");
            }
            reject(completion, "backend_saturated");
            return;
        }

        self.add_pending();
        metrics::counter!("proxy_requests_total", "outcome" => "queued").increment(1);
        self.queue.push_back(QueuedRequest { request, completion });
        self.connect(backend_id);
    }

    // --- Reactor callbacks ---

    /// An asynchronous connect finished.
    pub fn on_connect_resolved(&mut self, conn_id: ConnectionId, result: io::Result<()>) {
        if !self.owners.contains_key(&conn_id) {
            self.reactor.close(conn_id);
            return;
        }
        let Some(backend_id) = self.owner_of(conn_id, ConnectionState::Connecting) else {
            tracing::debug!(connection_id = %conn_id, "Ignoring duplicate connect notification");
            return;
        };

        if let Err(error) = result {
            self.on_connect_failure(backend_id, conn_id, &error, false);
            return;
        }

        let Some(backend) = self.registry.get_mut(backend_id) else {
            return;
        };
        backend.record_connect_success();
        if let Some(conn) = backend.connection_mut(conn_id) {
            conn.decoder = Some(ResponseDecoder::new());
        }
        tracing::debug!(backend = %backend.identity(), connection_id = %conn_id, "Connected");
        self.reactor.watch(conn_id, self.options.io_granularity);

        match self.queue.pop_front() {
            Some(queued) => self.hand_off(conn_id, queued.request, queued.completion),
            None => self.park(conn_id),
        }
    }

    /// Inbound bytes for `conn_id`.
    pub fn on_data(&mut self, conn_id: ConnectionId, data: &[u8]) {
        let mut chunk = data;
        loop {
            let Some(conn) = self.connection_mut(conn_id) else {
                return;
            };
            if conn.completion.is_none() {
                tracing::warn!(connection_id = %conn_id, state = %conn.state(), "Unsolicited data from backend");
                self.unload(conn_id, Unload::Unsolicited);
                return;
            }

            let decoder = conn.decoder.get_or_insert_with(ResponseDecoder::new);
            match decoder.decode(chunk) {
                Ok(Some(response)) => {
                    let more = decoder.has_buffered_data();
                    let reused = self.receive_response(conn_id, response, false);
                    if !reused || !more {
                        return;
                    }
                    chunk = &[];
                }
                Ok(None) => return,
                Err(error) => {
                    tracing::warn!(connection_id = %conn_id, error = %error, "Malformed upstream response");
                    self.unload(conn_id, Unload::DecodeFault);
                    return;
                }
            }
        }
    }

    /// The backend closed its side.
    pub fn on_eof(&mut self, conn_id: ConnectionId) {
        let Some(conn) = self.connection_mut(conn_id) else {
            return;
        };
        if conn.completion.is_some() {
            let finished = conn
                .decoder
                .as_mut()
                .and_then(ResponseDecoder::finish_close_delimited);
            if let Some(response) = finished {
                self.receive_response(conn_id, response, true);
                return;
            }
        }
        self.unload(conn_id, Unload::Eof);
    }

    pub fn on_read_fault(&mut self, conn_id: ConnectionId, error: &io::Error) {
        if self.owners.contains_key(&conn_id) {
            tracing::warn!(connection_id = %conn_id, error = %error, "Upstream read failed");
            self.unload(conn_id, Unload::ReadFault);
        }
    }

    pub fn on_writable(&mut self, conn_id: ConnectionId) {
        match self.connection_mut(conn_id).map(|conn| conn.state()) {
            Some(ConnectionState::Writing) => self.drive_writer(conn_id),
            Some(_) => self.reactor.disable_writable(conn_id),
            None => {}
        }
    }

    /// Run work scheduled through [`Reactor::immediately`] or [`Reactor::once`].
    pub fn run_deferred(&mut self, task: Deferred) {
        match task {
            Deferred::InitialConnect(backend_id) => {
                let Some(backend) = self.registry.get(backend_id) else {
                    return;
                };
                let missing = initial_pool_size(&self.options).saturating_sub(backend.cached_connection_count());
                tracing::debug!(backend = %backend.identity(), count = missing, "Opening initial connections");
                for _ in 0..missing {
                    self.connect(backend_id);
                }
            }
            Deferred::Reconnect(backend_id) => {
                if self.has_room(backend_id) {
                    self.connect(backend_id);
                }
            }
        }
    }

    // --- Teardown ---

    /// Close every connection and cancel all reactor work. In-flight requests
    /// get 502, queued ones 503.
    pub fn shutdown(&mut self) {
        self.reactor.cancel_all();

        let queued = self.queue.len();
        for entry in self.queue.drain(..) {
            entry.completion.settle(ProxyResponse::service_unavailable());
        }

        let mut in_flight = 0usize;
        for backend in self.registry.iter_mut() {
            for mut conn in backend.drain() {
                let _ = conn.transition(ConnectionState::Closing);
                if let Some(completion) = conn.completion.take() {
                    in_flight += 1;
                    completion.settle(ProxyResponse::bad_gateway());
                }
            }
            record_backend_gauge(backend);
        }

        self.owners.clear();
        self.total_pending = 0;
        metrics::gauge!("proxy_pending_requests").set(0.0);
        if queued > 0 || in_flight > 0 {
            tracing::info!(queued, in_flight, "Dispatcher shut down with outstanding requests");
        }
    }

    // --- Introspection ---

    pub fn total_pending_requests(&self) -> usize {
        self.total_pending
    }

    pub fn queued_requests(&self) -> usize {
        self.queue.len()
    }

    pub fn backends(&self) -> impl Iterator<Item = &Backend> {
        self.registry.iter()
    }

    pub fn backend(&self, id: BackendId) -> Option<&Backend> {
        self.registry.get(id)
    }

    pub fn connection(&self, conn_id: ConnectionId) -> Option<&Connection> {
        let backend_id = self.owners.get(&conn_id)?;
        self.registry.get(*backend_id)?.connection(conn_id)
    }

    pub fn stats(&self) -> ProxyStats {
        ProxyStats {
            total_pending_requests: self.total_pending,
            queued_requests: self.queue.len(),
            backends: self
                .registry
                .iter()
                .map(|backend| BackendStats {
                    identity: backend.identity().to_string(),
                    connections: backend.cached_connection_count(),
                    idle: backend.available_count(),
                    consecutive_connect_failures: backend.consecutive_connect_failures(),
                })
                .collect(),
        }
    }

    pub fn reactor(&self) -> &R {
        &self.reactor
    }

    pub fn reactor_mut(&mut self) -> &mut R {
        &mut self.reactor
    }

    // --- Internals ---

    /// Commit new options; a larger pool floor tops up every backend on the
    /// next turn.
    fn apply_options(&mut self, options: ProxyOptions) {
        let grown = initial_pool_size(&options) > initial_pool_size(&self.options);
        self.options = options;
        if grown {
            let ids: Vec<BackendId> = self.registry.iter().map(|backend| backend.id).collect();
            for id in ids {
                self.reactor.immediately(Deferred::InitialConnect(id));
            }
        }
    }

    fn connection_mut(&mut self, conn_id: ConnectionId) -> Option<&mut Connection> {
        let backend_id = *self.owners.get(&conn_id)?;
        self.registry.get_mut(backend_id)?.connection_mut(conn_id)
    }

    /// Owning backend of a live connection in `state`.
    fn owner_of(&self, conn_id: ConnectionId, state: ConnectionState) -> Option<BackendId> {
        let backend_id = *self.owners.get(&conn_id)?;
        let conn = self.registry.get(backend_id)?.connection(conn_id)?;
        (conn.state() == state).then_some(backend_id)
    }

    fn has_room(&self, backend_id: BackendId) -> bool {
        let hi_water = self.options.hi_water_connection_max;
        self.registry
            .get(backend_id)
            .is_some_and(|backend| hi_water == 0 || backend.cached_connection_count() < hi_water)
    }

    fn add_pending(&mut self) {
        self.total_pending += 1;
        metrics::gauge!("proxy_pending_requests").set(self.total_pending as f64);
    }

    fn release_pending(&mut self) {
        self.total_pending = self.total_pending.saturating_sub(1);
        metrics::gauge!("proxy_pending_requests").set(self.total_pending as f64);
    }

    fn set_state(&mut self, conn_id: ConnectionId, state: ConnectionState) -> bool {
        let Some(conn) = self.connection_mut(conn_id) else {
            return false;
        };
        match conn.transition(state) {
            Ok(()) => true,
            Err(error) => {
                tracing::error!(connection_id = %conn_id, error = %error, "Connection state machine violated");
                false
            }
        }
    }

    /// Open one new connection to `backend_id`.
    fn connect(&mut self, backend_id: BackendId) {
        let conn_id = self.ids.allocate();
        let Some(backend) = self.registry.get_mut(backend_id) else {
            return;
        };
        backend.insert(Connection::connecting(conn_id, backend_id));
        self.owners.insert(conn_id, backend_id);
        record_backend_gauge(backend);
        tracing::debug!(backend = %backend.identity(), connection_id = %conn_id, "Connecting");

        let addr = backend.addr.clone();
        if let Err(error) = self.reactor.connect(conn_id, &addr) {
            self.on_connect_failure(backend_id, conn_id, &error, true);
        }
    }

    fn on_connect_failure(
        &mut self,
        backend_id: BackendId,
        conn_id: ConnectionId,
        error: &io::Error,
        not_initiated: bool,
    ) {
        self.owners.remove(&conn_id);
        self.reactor.close(conn_id);
        let Some(backend) = self.registry.get_mut(backend_id) else {
            return;
        };
        backend.remove(conn_id);
        let failures = backend.record_connect_failure();
        let delay = connect_retry_delay(failures);

        record_backend_gauge(backend);
        metrics::counter!("proxy_connect_failures_total", "backend" => backend.identity().to_string())
            .increment(1);
        tracing::warn!(
            backend = %backend.identity(),
            failures,
            delay_secs = delay.as_secs(),
            error = %error,
            "Connect failed, scheduling retry"
        );

        if !delay.is_zero() {
            self.reactor.once(delay, Deferred::Reconnect(backend_id));
        } else if not_initiated {
            self.reactor.immediately(Deferred::Reconnect(backend_id));
        } else {
            self.connect(backend_id);
        }
    }

    /// Bind a request to a connection and start writing it.
    fn hand_off(&mut self, conn_id: ConnectionId, request: ProxyRequest, completion: Completion) {
        let head = build_request_head(&request, &self.options.proxy_pass_headers);

        if !self.set_state(conn_id, ConnectionState::Writing) {
            self.release_pending();
            completion.settle(ProxyResponse::bad_gateway());
            self.unload(conn_id, Unload::NotReusable);
            return;
        }
        let Some(conn) = self.connection_mut(conn_id) else {
            self.release_pending();
            completion.settle(ProxyResponse::bad_gateway());
            return;
        };
        conn.decoder
            .get_or_insert_with(ResponseDecoder::new)
            .expect_response_to(&request.method);
        conn.writer = Some(RequestWriter::new(head, request.body));
        conn.completion = Some(completion);
        tracing::trace!(connection_id = %conn_id, method = %request.method, target = %request.target, "Request handed off");

        self.drive_writer(conn_id);
    }

    fn drive_writer(&mut self, conn_id: ConnectionId) {
        let Some(backend_id) = self.owners.get(&conn_id).copied() else {
            return;
        };
        let Some(conn) = self
            .registry
            .get_mut(backend_id)
            .and_then(|backend| backend.connection_mut(conn_id))
        else {
            return;
        };
        let Some(writer) = conn.writer.as_mut() else {
            return;
        };

        let reactor = &mut self.reactor;
        match writer.write(|buf| reactor.try_write(conn_id, buf)) {
            Ok(true) => {
                conn.writer = None;
                self.reactor.disable_writable(conn_id);
                self.set_state(conn_id, ConnectionState::AwaitingResponse);
            }
            Ok(false) => self.reactor.enable_writable(conn_id),
            Err(error) => {
                tracing::warn!(connection_id = %conn_id, error = %error, "Upstream write failed");
                self.unload(conn_id, Unload::WriteFault);
            }
        }
    }

    /// Deliver a decoded response and recycle or close the connection.
    /// Returns true when the connection stays open.
    fn receive_response(
        &mut self,
        conn_id: ConnectionId,
        decoded: DecodedResponse,
        transport_closed: bool,
    ) -> bool {
        let Some(conn) = self.connection_mut(conn_id) else {
            return false;
        };
        let Some(completion) = conn.completion.take() else {
            return false;
        };
        let writer_pending = conn.writer.take().is_some();
        // After a protocol switch the peer no longer speaks HTTP.
        let close = transport_closed
            || writer_pending
            || decoded.status == StatusCode::SWITCHING_PROTOCOLS
            || should_close_after(decoded.version, &decoded.headers);

        self.release_pending();
        let status = decoded.status;
        metrics::counter!("proxy_responses_total", "status" => status.as_str().to_string())
            .increment(1);
        tracing::debug!(connection_id = %conn_id, status = status.as_u16(), close, "Upstream response");
        completion.settle(ProxyResponse::from_upstream(decoded));

        if close {
            self.unload(conn_id, Unload::NotReusable);
            return false;
        }

        match self.queue.pop_front() {
            Some(queued) => self.hand_off(conn_id, queued.request, queued.completion),
            None => self.park(conn_id),
        }
        true
    }

    /// Move a connection into its backend's idle list.
    fn park(&mut self, conn_id: ConnectionId) {
        if !self.set_state(conn_id, ConnectionState::Idle) {
            self.unload(conn_id, Unload::NotReusable);
            return;
        }
        if let Some(backend_id) = self.owners.get(&conn_id).copied() {
            if let Some(backend) = self.registry.get_mut(backend_id) {
                backend.release(conn_id);
            }
        }
    }

    /// Tear a connection down, failing its in-flight request with 502.
    fn unload(&mut self, conn_id: ConnectionId, reason: Unload) {
        let Some(backend_id) = self.owners.remove(&conn_id) else {
            return;
        };
        self.reactor.close(conn_id);
        let Some(backend) = self.registry.get_mut(backend_id) else {
            return;
        };
        let Some(mut conn) = backend.remove(conn_id) else {
            return;
        };
        let _ = conn.transition(ConnectionState::Closing);
        let remaining = backend.cached_connection_count();
        record_backend_gauge(backend);
        tracing::debug!(
            backend = %backend.identity(),
            connection_id = %conn_id,
            reason = reason.as_str(),
            remaining,
            "Connection unloaded"
        );

        if let Some(completion) = conn.completion.take() {
            self.release_pending();
            metrics::counter!("proxy_upstream_errors_total", "kind" => reason.as_str()).increment(1);
            completion.settle(ProxyResponse::bad_gateway());
        }

        if remaining < self.options.low_water_connection_min && self.has_room(backend_id) {
            self.connect(backend_id);
        }
    }
}

impl<R: Reactor> Drop for Dispatcher<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Connections a backend should hold before any traffic arrives.
fn initial_pool_size(options: &ProxyOptions) -> usize {
    match options.hi_water_connection_max {
        0 => options.low_water_connection_min,
        hi => options.low_water_connection_min.min(hi),
    }
}

fn reject(completion: Completion, reason: &'static str) {
    metrics::counter!("proxy_requests_total", "outcome" => reason).increment(1);
    tracing::debug!(reason, "Request rejected with 503");
    completion.settle(ProxyResponse::service_unavailable());
}

fn record_backend_gauge(backend: &Backend) {
    metrics::gauge!("proxy_backend_connections", "backend" => backend.identity().to_string())
        .set(backend.cached_connection_count() as f64);
}
