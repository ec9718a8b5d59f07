//! Queue tunables stored alongside the jobs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::backend::QueueError;

/// Default attempts allowed before dead-lettering
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default base (in seconds) for exponential backoff
pub const DEFAULT_BACKOFF_BASE: u32 = 2;

/// The recognized configuration keys; anything else is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigKey {
    MaxRetries,
    BackoffBase,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 2] = [ConfigKey::MaxRetries, ConfigKey::BackoffBase];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::MaxRetries => "max_retries",
            ConfigKey::BackoffBase => "backoff_base",
        }
    }

    pub fn default_value(&self) -> u32 {
        match self {
            ConfigKey::MaxRetries => DEFAULT_MAX_RETRIES,
            ConfigKey::BackoffBase => DEFAULT_BACKOFF_BASE,
        }
    }

    /// Parse and range-check a value before it is written
    pub fn validate(&self, value: &str) -> Result<u32, QueueError> {
        let parsed: u32 = value.trim().parse().map_err(|_| {
            QueueError::Validation(format!(
                "{} must be a non-negative integer, got '{}'",
                self, value
            ))
        })?;
        if *self == ConfigKey::BackoffBase && parsed == 0 {
            return Err(QueueError::Validation("backoff_base must be at least 1".into()));
        }
        Ok(parsed)
    }

    /// Interpret a stored value, falling back to the default when it is
    /// missing or unparsable
    pub fn resolve(&self, stored: Option<&str>) -> u32 {
        match stored {
            Some(raw) => match self.validate(raw) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(key = %self, error = %e, "Ignoring invalid stored config value");
                    self.default_value()
                }
            },
            None => self.default_value(),
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigKey {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max_retries" => Ok(ConfigKey::MaxRetries),
            "backoff_base" => Ok(ConfigKey::BackoffBase),
            _ => Err(QueueError::Validation(format!("unknown config key '{}'", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_keys() {
        assert_eq!("max_retries".parse::<ConfigKey>().unwrap(), ConfigKey::MaxRetries);
        assert_eq!("backoff_base".parse::<ConfigKey>().unwrap(), ConfigKey::BackoffBase);
        assert!("timeout".parse::<ConfigKey>().is_err());
        assert!("max-retries".parse::<ConfigKey>().is_err());
        assert!("MAX_RETRIES".parse::<ConfigKey>().is_err());
    }

    #[test]
    fn test_validate_values() {
        assert_eq!(ConfigKey::MaxRetries.validate("5").unwrap(), 5);
        assert_eq!(ConfigKey::MaxRetries.validate("0").unwrap(), 0);
        assert!(ConfigKey::MaxRetries.validate("-1").is_err());
        assert!(ConfigKey::MaxRetries.validate("three").is_err());
        assert_eq!(ConfigKey::BackoffBase.validate("3").unwrap(), 3);
        assert!(ConfigKey::BackoffBase.validate("0").is_err());
    }

    #[test]
    fn test_resolve_falls_back_to_default() {
        assert_eq!(ConfigKey::BackoffBase.resolve(None), DEFAULT_BACKOFF_BASE);
        assert_eq!(ConfigKey::BackoffBase.resolve(Some("garbage")), DEFAULT_BACKOFF_BASE);
        assert_eq!(ConfigKey::MaxRetries.resolve(Some("7")), 7);
    }
}
