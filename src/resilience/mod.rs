//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Connect failure on a backend:
//!     → failure streak incremented
//!     → backoff.rs (randomized delay from the streak)
//!     → Reconnect scheduled on the reactor
//! Successful connect:
//!     → streak reset
//! ```
//!
//! # Design Decisions
//! - Randomized delays spread reconnect storms across proxies
//! - No cap on the delay and no circuit breaker; a dead backend keeps being
//!   retried at a decreasing rate

pub mod backoff;
