//! Configuration schema definitions.
//!
//! This module defines the configuration file layout for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the reverse proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Front-end listener settings.
    pub listener: ListenerConfig,

    /// Backend URIs (`host:port`, optionally with a scheme), in round-robin order.
    pub backends: Vec<String>,

    /// Dispatcher options, passed through `configure` unchanged.
    pub proxy: toml::Table,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Value for `$serverName`; falls back to the request's Host header.
    pub server_name: Option<String>,

    /// Largest request body buffered before forwarding, in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            server_name: None,
            max_body_size: 2 * 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "backhaul=info,tower_http=info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_uses_defaults() {
        let config: ProxyConfig = toml::from_str(r#"backends = ["127.0.0.1:3000"]"#).unwrap();
        assert_eq!(config.backends, vec!["127.0.0.1:3000"]);
        assert_eq!(config.listener, ListenerConfig::default());
        assert!(config.proxy.is_empty());
        assert!(!config.observability.metrics_enabled);
    }

    #[test]
    fn full_file_parses() {
        let config: ProxyConfig = toml::from_str(
            r#"
            backends = ["127.0.0.1:3000", "tcp://app2:3000"]

            [listener]
            bind_address = "127.0.0.1:8081"
            server_name = "proxy.local"
            max_body_size = 1024

            [proxy]
            lowWaterConnectionMin = 2
            maxPendingRequests = 64

            [proxy.proxyPassHeaders]
            X-Forwarded-For = "$remoteAddr"

            [observability]
            json_logs = true
            "#,
        )
        .unwrap();

        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.listener.server_name.as_deref(), Some("proxy.local"));
        assert_eq!(config.listener.max_body_size, 1024);
        assert_eq!(config.proxy.len(), 3);
        assert!(config.observability.json_logs);
    }
}
