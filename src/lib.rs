//! Pooled reverse-proxy engine.
//!
//! Requests are forwarded to a round-robin set of upstream HTTP/1.1 backends
//! over a pool of persistent keep-alive connections. The core
//! ([`proxy::Dispatcher`]) is a synchronous state machine driven by a
//! [`net::Reactor`]; [`proxy::ProxyEngine`] runs it on Tokio and
//! [`http::HttpServer`] puts an Axum front-end on top.

// Core
pub mod codec;
pub mod load_balancer;
pub mod net;
pub mod proxy;

// Front-end and configuration
pub mod config;
pub mod http;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::{ProxyConfig, ProxyOptions};
pub use error::{ConfigurationError, ProxyError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::{ProxyEngine, ProxyHandle, ProxyRequest, ProxyResponse};
