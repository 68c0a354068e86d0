//! Backend abstraction.
//!
//! # Responsibilities
//! - Normalize backend URIs into a `host:port` identity
//! - Own every connection opened to the backend, connecting ones included
//! - Track the idle subset in FIFO order
//! - Track consecutive connect failures for backoff

use std::collections::{HashMap, VecDeque};
use std::fmt;

use url::Url;

use crate::error::ConfigurationError;
use crate::net::connection::{Connection, ConnectionId};

/// Position of a backend in the registry. Stable because the registry is
/// append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendId(usize);

impl BackendId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

/// Normalized upstream address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendAddr {
    /// Lowercased host; IPv6 literals keep their brackets.
    pub host: String,
    pub port: u16,
}

impl fmt::Display for BackendAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parse a backend URI into its `host:port` identity.
///
/// Accepts `host:port`, `tcp://host:port` or any `scheme://host:port[/]`.
/// The port must be explicit and non-zero.
pub fn parse_backend_uri(uri: &str) -> Result<BackendAddr, ConfigurationError> {
    let invalid = || ConfigurationError::InvalidBackendUri {
        uri: uri.to_string(),
    };

    let trimmed = uri.trim();
    let authority = match trimmed.split_once("://") {
        Some((_, rest)) => rest,
        None => trimmed,
    };
    if authority.is_empty() {
        return Err(invalid());
    }

    let url = Url::parse(&format!("tcp://{authority}")).map_err(|_| invalid())?;

    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
        _ => return Err(invalid()),
    };
    let port = match url.port() {
        Some(port) if port != 0 => port,
        _ => return Err(invalid()),
    };
    let extra_path = !(url.path().is_empty() || url.path() == "/");
    if extra_path
        || url.query().is_some()
        || url.fragment().is_some()
        || !url.username().is_empty()
        || url.password().is_some()
    {
        return Err(invalid());
    }

    Ok(BackendAddr { host, port })
}

/// A single upstream server and the connections opened to it.
#[derive(Debug)]
pub struct Backend {
    pub id: BackendId,
    pub addr: BackendAddr,
    /// Display form of `addr`, also the registry key.
    identity: String,
    connections: HashMap<ConnectionId, Connection>,
    available: VecDeque<ConnectionId>,
    consecutive_connect_failures: u32,
}

impl Backend {
    pub fn new(id: BackendId, addr: BackendAddr) -> Self {
        Self {
            id,
            identity: addr.to_string(),
            addr,
            connections: HashMap::new(),
            available: VecDeque::new(),
            consecutive_connect_failures: 0,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Number of owned connections, connecting ones included.
    pub fn cached_connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn available_count(&self) -> usize {
        self.available.len()
    }

    pub fn consecutive_connect_failures(&self) -> u32 {
        self.consecutive_connect_failures
    }

    pub fn insert(&mut self, connection: Connection) {
        self.connections.insert(connection.id, connection);
    }

    /// Remove a connection from both the owned set and the idle list.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.available.retain(|idle| *idle != id);
        self.connections.remove(&id)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// Pop the oldest idle connection.
    pub fn take_available(&mut self) -> Option<ConnectionId> {
        self.available.pop_front()
    }

    /// Return a connection to the idle list.
    pub fn release(&mut self, id: ConnectionId) {
        if self.connections.contains_key(&id) && !self.available.contains(&id) {
            self.available.push_back(id);
        }
    }

    pub fn record_connect_success(&mut self) {
        self.consecutive_connect_failures = 0;
    }

    /// Count a failed connect and return the new streak length.
    pub fn record_connect_failure(&mut self) -> u32 {
        self.consecutive_connect_failures = self.consecutive_connect_failures.saturating_add(1);
        self.consecutive_connect_failures
    }

    /// Remove every connection, for teardown.
    pub fn drain(&mut self) -> Vec<Connection> {
        self.available.clear();
        self.connections.drain().map(|(_, conn)| conn).collect()
    }
}
