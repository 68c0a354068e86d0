//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → front-end stops accepting, drains
//!               → engine settles outstanding requests, closes upstream sockets
//! ```
//!
//! # Design Decisions
//! - One broadcast channel; every long-running task subscribes
//! - Queued requests get 503 and in-flight ones 502 when the engine stops

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
