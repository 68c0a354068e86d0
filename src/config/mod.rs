//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig
//!     → options.rs turns the [proxy] table into ProxyOptions
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → engine receives new options and any new backends
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Runtime `configure` calls and the file share one option parser

pub mod loader;
pub mod options;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use options::{OptionValue, ProxyOptions};
pub use schema::{ListenerConfig, ObservabilityConfig, ProxyConfig};
