//! Runtime configuration.
//!
//! Loaded from YAML; every section has defaults so a partial file (or
//! none at all) is valid. Durations use human form: `"30m"`, `"250ms"`.
//!
//! ```yaml
//! completion:
//!   model: claude-sonnet-4-5-20250514
//!   fallback_model: claude-haiku-4-5
//! stream_breaker:
//!   failure_threshold: 5
//!   call_timeout: 60s
//! sessions:
//!   session_timeout: 30m
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::providers::CompletionConfig;
use crate::resilience::{CircuitBreakerConfig, RateLimiterConfig, RetryConfig};
use crate::sessions::SessionConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Serde adapter for `Duration` as a humantime string.
pub mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Channel and prompt-window settings for streamed turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Bounded capacity of the chunk channel
    pub channel_capacity: usize,

    /// How many recent messages go into each prompt
    pub history_window: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 32,
            history_window: 5,
        }
    }
}

/// Response cache used as the secondary introduction tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: u64,
    #[serde(with = "humantime_duration")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Model settings, plus an optional cheaper model for the tertiary tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionSettings {
    #[serde(flatten)]
    pub request: CompletionConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_model: Option<String>,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            request: CompletionConfig::default(),
            fallback_model: Some("claude-haiku-4-5".to_string()),
        }
    }
}

/// Complete configuration for a walkthrough service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkthroughConfig {
    pub completion: CompletionSettings,
    pub retry: RetryConfig,
    pub completion_breaker: CircuitBreakerConfig,
    pub stream_breaker: CircuitBreakerConfig,
    pub rate_limiter: RateLimiterConfig,
    pub sessions: SessionConfig,
    pub stream: StreamConfig,
    pub cache: CacheConfig,
}

impl Default for WalkthroughConfig {
    fn default() -> Self {
        Self {
            completion: CompletionSettings::default(),
            retry: RetryConfig::default(),
            completion_breaker: CircuitBreakerConfig::default(),
            stream_breaker: CircuitBreakerConfig {
                call_timeout: Duration::from_secs(60),
                ..CircuitBreakerConfig::default()
            },
            rate_limiter: RateLimiterConfig::default(),
            sessions: SessionConfig::default(),
            stream: StreamConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl WalkthroughConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    /// Render as YAML with human-readable durations.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject values that would deadlock or disable a component.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            }
        }

        if self.retry.max_delay < self.retry.initial_delay {
            return Err(invalid("retry.max_delay", "must be >= retry.initial_delay"));
        }
        if self.retry.factor < 1.0 {
            return Err(invalid("retry.factor", "must be >= 1.0"));
        }
        for (field, breaker) in [
            ("completion_breaker", &self.completion_breaker),
            ("stream_breaker", &self.stream_breaker),
        ] {
            if breaker.failure_threshold == 0 || breaker.success_threshold == 0 {
                return Err(invalid(field, "thresholds must be at least 1"));
            }
            if breaker.call_timeout.is_zero() {
                return Err(invalid(field, "call_timeout must be non-zero"));
            }
            if breaker.half_open_max_calls == 0 {
                return Err(invalid(field, "half_open_max_calls must be at least 1"));
            }
        }
        if self.rate_limiter.max_concurrent == 0 {
            return Err(invalid("rate_limiter.max_concurrent", "must be at least 1"));
        }
        if self.rate_limiter.requests_per_window == 0 {
            return Err(invalid("rate_limiter.requests_per_window", "must be at least 1"));
        }
        if self.rate_limiter.window.is_zero() {
            return Err(invalid("rate_limiter.window", "must be non-zero"));
        }
        if self.sessions.session_timeout.is_zero() || self.sessions.reaper_interval.is_zero() {
            return Err(invalid("sessions", "timeouts must be non-zero"));
        }
        if self.stream.channel_capacity == 0 {
            return Err(invalid("stream.channel_capacity", "must be at least 1"));
        }
        Ok(())
    }
}
