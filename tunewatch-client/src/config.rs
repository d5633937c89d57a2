//! Configuration loading for Tunewatch clients.
//!
//! `base_url` is required; every other section falls back to the defaults the
//! dashboard ships with when omitted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tunewatch_core::Priority;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub offline: OfflineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub warming: WarmingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    /// How long a live result is served without a network call.
    pub stale_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FallbackConfig {
    /// Records older than this are deleted rather than served.
    pub hard_ttl_ms: u64,
    /// Records older than this are served marked stale.
    pub freshness_ms: u64,
    /// JSON file for records; in-memory when absent.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OfflineConfig {
    pub probe_path: String,
    pub probe_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub replay_batch_size: usize,
    pub replay_pause_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryConfig {
    pub essential: RetryPolicy,
    pub secondary: RetryPolicy,
    pub optional: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct WarmingConfig {
    pub enabled: bool,
    pub cooldown_ms: u64,
    pub navigation_threshold: f64,
    pub idle_interval_ms: u64,
    /// Query keys warmed at login, by role.
    pub starter_sets: BTreeMap<String, Vec<String>>,
    /// from view -> (to view -> probability).
    pub navigation: BTreeMap<String, BTreeMap<String, f64>>,
    /// Query keys backing each view.
    pub views: BTreeMap<String, Vec<String>>,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time_ms: 5 * 60 * 1000,
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            hard_ttl_ms: 24 * 60 * 60 * 1000,
            freshness_ms: 30 * 60 * 1000,
            path: None,
        }
    }
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            probe_path: "/health/ping".to_string(),
            probe_interval_ms: 30_000,
            probe_timeout_ms: 5_000,
            replay_batch_size: 3,
            replay_pause_ms: 500,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            essential: RetryPolicy::critical(),
            secondary: RetryPolicy::standard(),
            optional: RetryPolicy::none(),
        }
    }
}

impl RetryConfig {
    pub fn for_priority(&self, priority: Priority) -> RetryPolicy {
        match priority {
            Priority::Essential => self.essential,
            Priority::Secondary => self.secondary,
            Priority::Optional => self.optional,
        }
    }
}

impl Default for WarmingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_ms: 5 * 60 * 1000,
            navigation_threshold: 0.3,
            idle_interval_ms: 30_000,
            starter_sets: BTreeMap::new(),
            navigation: BTreeMap::new(),
            views: BTreeMap::new(),
        }
    }
}

impl WarmingConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

impl ClientConfig {
    /// Defaults for everything except the API location.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout_ms: default_request_timeout_ms(),
            cache: CacheConfig::default(),
            fallback: FallbackConfig::default(),
            offline: OfflineConfig::default(),
            retry: RetryConfig::default(),
            warming: WarmingConfig::default(),
        }
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.base_url.trim();
        if base.is_empty() {
            return Err(invalid("base_url", "must not be empty"));
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(invalid("base_url", "must be an http(s) URL"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms", "must be > 0"));
        }
        if self.fallback.hard_ttl_ms == 0 {
            return Err(invalid("fallback.hard_ttl_ms", "must be > 0"));
        }
        if self.fallback.freshness_ms > self.fallback.hard_ttl_ms {
            return Err(invalid("fallback.freshness_ms", "must be <= hard_ttl_ms"));
        }
        if !self.offline.probe_path.starts_with('/') {
            return Err(invalid("offline.probe_path", "must start with '/'"));
        }
        if self.offline.probe_interval_ms == 0 {
            return Err(invalid("offline.probe_interval_ms", "must be > 0"));
        }
        if self.offline.replay_batch_size == 0 {
            return Err(invalid("offline.replay_batch_size", "must be > 0"));
        }
        self.retry
            .essential
            .validate()
            .map_err(|reason| invalid("retry.essential", &reason))?;
        self.retry
            .secondary
            .validate()
            .map_err(|reason| invalid("retry.secondary", &reason))?;
        self.retry
            .optional
            .validate()
            .map_err(|reason| invalid("retry.optional", &reason))?;
        if !(0.0..=1.0).contains(&self.warming.navigation_threshold) {
            return Err(invalid("warming.navigation_threshold", "must be within 0.0..=1.0"));
        }
        if self.warming.idle_interval_ms == 0 {
            return Err(invalid("warming.idle_interval_ms", "must be > 0"));
        }
        let bad_probability = self
            .warming
            .navigation
            .values()
            .flat_map(|targets| targets.values())
            .any(|p| !(0.0..=1.0).contains(p));
        if bad_probability {
            return Err(invalid("warming.navigation", "probabilities must be within 0.0..=1.0"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = ClientConfig::from_toml_str(r#"base_url = "http://localhost:3000""#).unwrap();
        assert_eq!(config.cache.stale_time_ms, 300_000);
        assert_eq!(config.fallback.hard_ttl_ms, 86_400_000);
        assert_eq!(config.fallback.freshness_ms, 1_800_000);
        assert_eq!(config.offline.replay_batch_size, 3);
        assert_eq!(config.retry.essential.max_retries, 3);
        assert_eq!(config.retry.optional.max_retries, 0);
        assert_eq!(config, ClientConfig::new("http://localhost:3000"));
    }

    #[test]
    fn test_full_config() {
        let config = ClientConfig::from_toml_str(
            r#"
            base_url = "https://tunewatch.app"
            request_timeout_ms = 4000

            [fallback]
            freshness_ms = 60000
            path = "/var/lib/tunewatch/fallback.json"

            [retry.secondary]
            max_retries = 1
            base_delay_ms = 250
            backoff_multiplier = 3.0
            max_delay_ms = 1000

            [warming]
            navigation_threshold = 0.5

            [warming.starter_sets]
            admin = ["songs-ranking", "radios"]

            [warming.navigation.dashboard]
            radios = 0.6
            reports = 0.1
            "#,
        )
        .unwrap();
        assert_eq!(config.fallback.freshness_ms, 60_000);
        assert_eq!(config.fallback.hard_ttl_ms, 86_400_000);
        assert_eq!(config.retry.secondary.base_delay_ms, 250);
        assert_eq!(config.retry.for_priority(Priority::Secondary).max_retries, 1);
        assert_eq!(config.warming.starter_sets["admin"].len(), 2);
        assert_eq!(config.warming.navigation["dashboard"]["radios"], 0.6);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = ClientConfig::from_toml_str(
            r#"
            base_url = "http://localhost"
            [cache]
            stale_time = 10
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation() {
        let mut config = ClientConfig::new("localhost:3000");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "base_url", .. })
        ));

        config.base_url = "http://localhost:3000".to_string();
        config.fallback.freshness_ms = config.fallback.hard_ttl_ms + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "fallback.freshness_ms", .. })
        ));

        config.fallback = FallbackConfig::default();
        config.retry.essential.max_delay_ms = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "retry.essential", .. })
        ));
    }
}
