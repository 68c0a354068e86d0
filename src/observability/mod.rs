//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! dispatcher, engine, front-end:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and gauges via the metrics facade)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows from the front-end into log fields
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
