//! Event-loop seam between the dispatcher and real sockets.
//!
//! The dispatcher never performs I/O or spawns tasks itself. It asks a
//! [`Reactor`] to start connects, watch sockets and run deferred work, and the
//! reactor reports back by calling the dispatcher's `on_*` entry points on the
//! same logical thread. Nothing here may call back into the dispatcher
//! synchronously.

use std::io;
use std::time::Duration;

use crate::load_balancer::backend::{BackendAddr, BackendId};
use crate::net::connection::ConnectionId;

/// Work the dispatcher schedules for a later turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferred {
    /// Open the initial pool for a newly added backend.
    InitialConnect(BackendId),
    /// Retry after a failed connect.
    Reconnect(BackendId),
}

/// Non-blocking I/O and scheduling primitives.
pub trait Reactor {
    /// Start an asynchronous connect for `conn`.
    ///
    /// `Err` means the attempt could not even be initiated. Otherwise the
    /// outcome is reported later through `Dispatcher::on_connect_resolved`.
    fn connect(&mut self, conn: ConnectionId, addr: &BackendAddr) -> io::Result<()>;

    /// Start delivering inbound bytes for an established connection, at most
    /// `read_limit` bytes per notification.
    fn watch(&mut self, conn: ConnectionId, read_limit: usize);

    /// Request a writability notification.
    fn enable_writable(&mut self, conn: ConnectionId);

    fn disable_writable(&mut self, conn: ConnectionId);

    /// Non-blocking write; `WouldBlock` when the socket buffer is full.
    fn try_write(&mut self, conn: ConnectionId, buf: &[u8]) -> io::Result<usize>;

    /// Release the socket and every watcher registered for it.
    fn close(&mut self, conn: ConnectionId);

    /// Run `task` on the next turn.
    fn immediately(&mut self, task: Deferred);

    /// Run `task` after `delay`.
    fn once(&mut self, delay: Duration, task: Deferred);

    /// Cancel every watcher and timer.
    fn cancel_all(&mut self);
}
