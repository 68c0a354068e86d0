//! Reverse-proxy core.
//!
//! # Data Flow
//! ```text
//! ProxyHandle::submit(request)
//!     → engine.rs (command channel, single task)
//!     → dispatcher.rs
//!         - admission (maxPendingRequests → 503)
//!         - round-robin backend pick
//!         - idle connection, or queue + connect (hiWaterConnectionMax → 503)
//!     → headers.rs (outbound head) → codec writer
//!     → codec decoder → response.rs → completion.rs
//!     → connection recycled, reused for the queue head, or closed
//! ```
//!
//! # Design Decisions
//! - The dispatcher is sans-IO; the tokio reactor and the tests' scripted
//!   reactor plug into the same trait
//! - Failures never escape as errors once a request is admitted; they become
//!   canned 502/503 responses

pub mod completion;
pub mod dispatcher;
pub mod engine;
pub mod headers;
pub mod request;
pub mod response;

pub use completion::{Completion, ResponseFuture};
pub use dispatcher::{BackendStats, Dispatcher, ProxyStats};
pub use engine::{ProxyEngine, ProxyHandle};
pub use request::{ConnectionInfo, ProxyRequest};
pub use response::ProxyResponse;
