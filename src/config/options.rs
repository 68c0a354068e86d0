//! Runtime proxy options.
//!
//! # Responsibilities
//! - Hold the admission and pool-sizing knobs the dispatcher reads
//! - Apply `key → value` updates with case-insensitive keys
//! - Validate or clamp each value the way the option defines
//!
//! # Design Decisions
//! - Keys ignore case and underscores, so `lowWaterConnectionMin` and
//!   `low_water_connection_min` name the same option
//! - Unknown keys are errors, never silently ignored
//! - The TOML `[proxy]` table goes through the same path as runtime calls

use crate::error::ConfigurationError;
use crate::proxy::headers::ProxyPassHeaders;

pub const DEFAULT_LOW_WATER_CONNECTION_MIN: usize = 4;
pub const MAX_LOW_WATER_CONNECTION_MIN: i64 = 100;
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 1024;
pub const DEFAULT_IO_GRANULARITY: usize = 262_144;

/// A loosely typed option value, as it arrives from callers or config files.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Int(i64),
    Text(String),
    Map(Vec<(String, String)>),
}

impl OptionValue {
    fn as_int(&self) -> Option<i64> {
        match self {
            OptionValue::Int(value) => Some(*value),
            OptionValue::Text(text) => text.trim().parse().ok(),
            OptionValue::Map(_) => None,
        }
    }

    /// Convert a TOML value; returns `None` for shapes no option accepts.
    pub fn from_toml(value: &toml::Value) -> Option<Self> {
        match value {
            toml::Value::Integer(value) => Some(OptionValue::Int(*value)),
            toml::Value::String(text) => Some(OptionValue::Text(text.clone())),
            toml::Value::Table(table) => table
                .iter()
                .map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_string())))
                .collect::<Option<Vec<_>>>()
                .map(OptionValue::Map),
            _ => None,
        }
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Text(value.to_string())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for OptionValue {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        OptionValue::Map(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionKey {
    LowWaterConnectionMin,
    HiWaterConnectionMax,
    MaxPendingRequests,
    ProxyPassHeaders,
    IoGranularity,
}

impl OptionKey {
    fn parse(key: &str) -> Option<Self> {
        let folded: String = key
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match folded.as_str() {
            "lowwaterconnectionmin" | "lowaterconnectionmin" => Some(Self::LowWaterConnectionMin),
            "hiwaterconnectionmax" => Some(Self::HiWaterConnectionMax),
            "maxpendingrequests" => Some(Self::MaxPendingRequests),
            "proxypassheaders" => Some(Self::ProxyPassHeaders),
            "iogranularity" => Some(Self::IoGranularity),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::LowWaterConnectionMin => "lowWaterConnectionMin",
            Self::HiWaterConnectionMax => "hiWaterConnectionMax",
            Self::MaxPendingRequests => "maxPendingRequests",
            Self::ProxyPassHeaders => "proxyPassHeaders",
            Self::IoGranularity => "ioGranularity",
        }
    }
}

/// Options read by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyOptions {
    /// Pool floor per backend; reconnects fire when a backend drops below it.
    pub low_water_connection_min: usize,
    /// Pool ceiling per backend; 0 means unlimited.
    pub hi_water_connection_max: usize,
    /// Global cap on outstanding plus queued requests.
    pub max_pending_requests: usize,
    pub proxy_pass_headers: ProxyPassHeaders,
    /// Maximum bytes taken from a socket per readability notification.
    pub io_granularity: usize,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            low_water_connection_min: DEFAULT_LOW_WATER_CONNECTION_MIN,
            hi_water_connection_max: 0,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            proxy_pass_headers: ProxyPassHeaders::default(),
            io_granularity: DEFAULT_IO_GRANULARITY,
        }
    }
}

impl ProxyOptions {
    /// Apply a single option.
    pub fn set_option(
        &mut self,
        key: &str,
        value: OptionValue,
    ) -> Result<&mut Self, ConfigurationError> {
        let option = OptionKey::parse(key)
            .ok_or_else(|| ConfigurationError::UnknownOption(key.to_string()))?;
        let name = option.name();

        match option {
            OptionKey::LowWaterConnectionMin => {
                let count = integer(name, &value)?;
                self.low_water_connection_min = count.clamp(0, MAX_LOW_WATER_CONNECTION_MIN) as usize;
            }
            OptionKey::HiWaterConnectionMax => {
                self.hi_water_connection_max = at_least(name, &value, 0)?;
            }
            OptionKey::MaxPendingRequests => {
                self.max_pending_requests = at_least(name, &value, 1)?;
            }
            OptionKey::IoGranularity => {
                self.io_granularity = at_least(name, &value, 1)?;
            }
            OptionKey::ProxyPassHeaders => match value {
                OptionValue::Map(entries) => {
                    self.proxy_pass_headers = ProxyPassHeaders::parse(entries)?;
                }
                _ => {
                    return Err(ConfigurationError::invalid_value(
                        name,
                        "expected a header-name to value mapping",
                    ))
                }
            },
        }
        Ok(self)
    }

    /// Apply several options; stops at the first error.
    pub fn set_all<I, K>(&mut self, options: I) -> Result<&mut Self, ConfigurationError>
    where
        I: IntoIterator<Item = (K, OptionValue)>,
        K: AsRef<str>,
    {
        for (key, value) in options {
            self.set_option(key.as_ref(), value)?;
        }
        Ok(self)
    }

    /// Build options from a TOML `[proxy]` table on top of the defaults.
    pub fn from_table(table: &toml::Table) -> Result<Self, ConfigurationError> {
        let mut options = Self::default();
        for (key, value) in table {
            let value = OptionValue::from_toml(value).ok_or_else(|| {
                ConfigurationError::invalid_value(key, "unsupported value type")
            })?;
            options.set_option(key, value)?;
        }
        Ok(options)
    }
}

fn integer(name: &str, value: &OptionValue) -> Result<i64, ConfigurationError> {
    value
        .as_int()
        .ok_or_else(|| ConfigurationError::invalid_value(name, "expected an integer"))
}

fn at_least(name: &str, value: &OptionValue, min: i64) -> Result<usize, ConfigurationError> {
    let count = integer(name, value)?;
    if count < min {
        return Err(ConfigurationError::invalid_value(
            name,
            format!("must be at least {min}, got {count}"),
        ));
    }
    usize::try_from(count).map_err(|_| ConfigurationError::invalid_value(name, "out of range"))
}
