//! HTTP/1.x wire codecs for upstream connections.
//!
//! # Data Flow
//! ```text
//! ProxyRequest
//!     → proxy::headers (serialize head)
//!     → writer.rs (partial writes until drained)
//!     → upstream socket
//!
//! upstream socket
//!     → decoder.rs (incremental parse, body framing)
//!     → DecodedResponse → dispatcher
//! ```
//!
//! # Design Decisions
//! - Outbound requests are always re-framed with an exact Content-Length
//! - Inbound bodies are buffered whole before completion fires
//! - One decoder per connection, reset between messages

pub mod decoder;
pub mod writer;

pub use decoder::{DecodeError, DecodedResponse, ResponseDecoder};
pub use writer::RequestWriter;
