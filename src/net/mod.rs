//! Upstream network layer.
//!
//! # Data Flow
//! ```text
//! Dispatcher
//!     → reactor.rs (Reactor trait: connect, watch, write, timers)
//!     → tokio_reactor.rs (spawned helper tasks, sockets)
//!     → IoEvent channel → engine → Dispatcher::on_*
//!
//! Connection States (connection.rs):
//!     Connecting → Idle ⇄ Writing → AwaitingResponse → Idle
//!                 any state → Closing
//! ```

pub mod connection;
pub mod reactor;
pub mod tokio_reactor;

pub use connection::{Connection, ConnectionId, ConnectionState};
pub use reactor::{Deferred, Reactor};
pub use tokio_reactor::{IoEvent, TokioReactor};
