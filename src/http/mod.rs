//! HTTP front-end subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → proxy_handler (buffer body, build ProxyRequest)
//!     → ProxyHandle::submit (engine picks backend and connection)
//!     → ProxyResponse → HTTP response
//! ```

pub mod server;

pub use server::{AppState, HttpServer};
