//! Upstream connection state machine.
//!
//! # Responsibilities
//! - Name each upstream socket with a dispatcher-local ID for tracing
//! - Hold the single authoritative lifecycle state of a connection
//! - Reject illegal state transitions
//! - Carry the per-connection decoder, pending writer and in-flight completion
//!
//! # States
//! ```text
//! Connecting → Idle ⇄ Writing → AwaitingResponse → {Idle | Writing | Closing}
//! ```
//! Any state may move to `Closing`, which is terminal.

use std::fmt;

use crate::codec::{RequestWriter, ResponseDecoder};
use crate::load_balancer::backend::BackendId;
use crate::proxy::completion::Completion;

/// Unique identifier for an upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Hands out connection IDs; owned by one dispatcher, no global counter.
#[derive(Debug, Default)]
pub struct ConnectionIdAllocator {
    next: u64,
}

impl ConnectionIdAllocator {
    pub fn allocate(&mut self) -> ConnectionId {
        self.next += 1;
        ConnectionId(self.next)
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Asynchronous connect in progress.
    Connecting,
    /// Connected with no request in flight; sits in the backend's idle list.
    Idle,
    /// Request bytes still being written.
    Writing,
    /// Request fully written, waiting for the response.
    AwaitingResponse,
    /// Torn down; the socket has been released.
    Closing,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Idle | Writing | Closing)
                | (Idle, Writing | Closing)
                | (Writing, AwaitingResponse | Closing)
                | (AwaitingResponse, Idle | Writing | Closing)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Idle => "idle",
            ConnectionState::Writing => "writing",
            ConnectionState::AwaitingResponse => "awaiting_response",
            ConnectionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// A rejected state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Illegal connection transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// One upstream socket and the request currently bound to it.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    /// Owning backend; lookup only.
    pub backend: BackendId,
    state: ConnectionState,
    /// Present once the connect has succeeded.
    pub decoder: Option<ResponseDecoder>,
    /// Present only while request bytes remain unsent.
    pub writer: Option<RequestWriter>,
    /// At most one outstanding completion.
    pub completion: Option<Completion>,
}

impl Connection {
    pub fn connecting(id: ConnectionId, backend: BackendId) -> Self {
        Self {
            id,
            backend,
            state: ConnectionState::Connecting,
            decoder: None,
            writer: None,
            completion: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn transition(&mut self, next: ConnectionState) -> Result<(), IllegalTransition> {
        if !self.state.can_transition_to(next) {
            return Err(IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(connection_id = %self.id, from = %self.state, to = %next, "Connection state change");
        self.state = next;
        Ok(())
    }

    /// True when the connection may sit in the idle list.
    pub fn is_reusable(&self) -> bool {
        self.state == ConnectionState::Idle && self.completion.is_none() && self.writer.is_none()
    }
}
