//! Serde configuration for rules and the global limiter.
//!
//! ```yaml
//! rule:
//!   mode: independent
//!   rules:
//!     - window: 1s
//!       allowance: 5
//!     - window: 1h
//!       allowance: 100
//!       estimated: 10000
//! global:
//!   max: 512
//!   mode: strict
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::info;

use crate::AdmissionMode;
use crate::LimitMode;
use crate::error::ConfigError;

/// Parses a human readable duration such as `"1s"`, `"250ms"` or `"1h 30m"`.
pub fn parse_window(value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|source| ConfigError::InvalidDuration {
        value: value.to_string(),
        source,
    })
}

mod window_serde {
    use std::time::Duration;

    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_window(&raw).map_err(serde::de::Error::custom)
    }
}

/// One sliding window of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(with = "window_serde")]
    pub window: Duration,
    pub allowance: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated: Option<usize>,
}

/// A multi-window rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub mode: AdmissionMode,
    pub rules: Vec<WindowConfig>,
}

/// The in-flight limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub max: u64,
    #[serde(default)]
    pub mode: LimitMode,
}

/// Top level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<RuleConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<GlobalConfig>,
}

impl LimitsConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading rate limit configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: LimitsConfig = serde_yaml::from_str(yaml)?;
        if let Some(rule) = &config.rule {
            rule.validate()?;
        }
        Ok(config)
    }
}

impl RuleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rules.is_empty() {
            return Err(ConfigError::EmptyRules);
        }
        Ok(())
    }
}
