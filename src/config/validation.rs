//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that every backend URI normalizes to `host:port`
//! - Check that the `[proxy]` table is a valid option set
//! - Validate addresses and size limits
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::options::ProxyOptions;
use crate::config::schema::ProxyConfig;
use crate::load_balancer::backend::parse_backend_uri;

/// A single semantic problem in a config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check `config` and collect every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {:?}", config.listener.bind_address),
        ));
    }
    if config.listener.max_body_size == 0 {
        errors.push(ValidationError::new("listener.max_body_size", "must be greater than 0"));
    }

    for (i, uri) in config.backends.iter().enumerate() {
        if let Err(e) = parse_backend_uri(uri) {
            errors.push(ValidationError::new(format!("backends[{i}]"), e.to_string()));
        }
    }

    if let Err(e) = ProxyOptions::from_table(&config.proxy) {
        errors.push(ValidationError::new("proxy", e.to_string()));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {:?}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let config: ProxyConfig = toml::from_str(
            r#"
            backends = ["127.0.0.1:3000", "nope", "host:0"]

            [listener]
            bind_address = "localhost"

            [proxy]
            maxPendingRequests = 0

            [observability]
            metrics_enabled = true
            metrics_address = "bad"
            "#,
        )
        .unwrap();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            [
                "listener.bind_address",
                "backends[1]",
                "backends[2]",
                "proxy",
                "observability.metrics_address"
            ]
        );
    }
}
