//! Configuration for the bridge service.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;
use xtap_registry::MAX_UNITS;

/// Bridge configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Number of tap units to create.
    #[serde(default = "default_max_taps")]
    pub max_taps: u32,

    /// Diagnostic verbosity threshold (kernel-style, 0..=7). Gates the
    /// per-frame debug lines; also mapped to the default tracing filter.
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,
}

fn default_max_taps() -> u32 {
    1
}

fn default_verbosity() -> u8 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_taps: default_max_taps(),
            verbosity: default_verbosity(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_taps = match std::env::var("XTAP_MAX_TAPS") {
            Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                var: "XTAP_MAX_TAPS",
                value,
            })?,
            Err(_) => default_max_taps(),
        };

        let verbosity = match std::env::var("XTAP_VERBOSITY") {
            Ok(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                var: "XTAP_VERBOSITY",
                value,
            })?,
            Err(_) => default_verbosity(),
        };

        let config = Self {
            max_taps,
            verbosity,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the address space cannot accommodate. This is
    /// a load-time fatal check; nothing gets registered on failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_taps > MAX_UNITS {
            return Err(ConfigError::TooManyTaps {
                requested: self.max_taps,
            });
        }
        Ok(())
    }

    /// Default tracing directive for this verbosity.
    pub fn tracing_directive(&self) -> &'static str {
        match self.verbosity {
            0 => "error",
            1 => "warn",
            2..=3 => "info",
            _ => "debug",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_taps, 1);
        assert_eq!(config.verbosity, 5);
        assert!(config.validate().is_ok());
        assert_eq!(config.tracing_directive(), "debug");
    }

    #[test]
    fn test_max_taps_bound_is_fatal() {
        let config = Config {
            max_taps: MAX_UNITS + 1,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooManyTaps { requested }) if requested == MAX_UNITS + 1
        ));
    }

    #[test]
    fn test_from_json() {
        let config: Config = serde_json::from_str(r#"{"max_taps": 3}"#).unwrap();
        assert_eq!(config.max_taps, 3);
        assert_eq!(config.verbosity, 5);
    }
}
