//! Error types shared by the proxy engine and its handle.
//!
//! Configuration mistakes fail synchronously at the call that made them.
//! Everything that goes wrong while traffic is flowing (connect failures,
//! malformed upstream bytes, closed sockets, exhausted capacity) degrades to a
//! synthesized response instead and never shows up here.

/// A rejected configuration call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Invalid proxy backend URI: {uri}")]
    InvalidBackendUri { uri: String },

    #[error("Unrecognized option: {0}")]
    UnknownOption(String),

    #[error("Invalid value for option {option}: {reason}")]
    InvalidOptionValue { option: String, reason: String },
}

impl ConfigurationError {
    pub(crate) fn invalid_value(option: &str, reason: impl Into<String>) -> Self {
        Self::InvalidOptionValue {
            option: option.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors returned by [`ProxyHandle`](crate::proxy::ProxyHandle) operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProxyError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Proxy engine is not running")]
    EngineStopped,
}
