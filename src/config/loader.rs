//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::options::ProxyOptions;
use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::error::ConfigurationError;

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
    Options(ConfigurationError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
            ConfigError::Options(e) => write!(f, "Invalid proxy options: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigurationError> for ConfigError {
    fn from(e: ConfigurationError) -> Self {
        ConfigError::Options(e)
    }
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<ProxyConfig, ConfigError> {
    let config: ProxyConfig = toml::from_str(content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

impl ProxyConfig {
    /// Dispatcher options described by the `[proxy]` table.
    pub fn proxy_options(&self) -> Result<ProxyOptions, ConfigError> {
        Ok(ProxyOptions::from_table(&self.proxy)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/backhaul.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn syntax_error_is_parse_error() {
        assert!(matches!(parse_config("backends = ["), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn semantic_error_is_validation_error() {
        let err = parse_config(r#"backends = ["no-port"]"#).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
        assert!(err.to_string().starts_with("Validation failed: backends[0]"));
    }

    #[test]
    fn proxy_table_becomes_options() {
        let config = parse_config(
            r#"
            [proxy]
            hi_water_connection_max = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.proxy_options().unwrap().hi_water_connection_max, 8);
    }
}
