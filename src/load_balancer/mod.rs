//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! submit(request)
//!     → pool.rs (registry, round-robin pick)
//!     → backend.rs (idle connection, or room for a new one)
//!     → dispatcher hands off, queues, or rejects
//! ```
//!
//! # Design Decisions
//! - Backends are identified by normalized `host:port` and never removed
//! - Selection is plain round-robin; no health or load awareness
//! - Each backend owns its connections; the dispatcher only borrows them

pub mod backend;
pub mod pool;
pub mod round_robin;
