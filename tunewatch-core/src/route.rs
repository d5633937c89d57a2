//! Per-route cache configuration.
//!
//! Routes are configured by path prefix. Lookup is an explicit ordered list
//! evaluated longest-prefix-first, falling back to a disabled default, so the
//! result never depends on insertion order.

use crate::error::ConfigError;
use crate::DurationMs;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default TTL applied when a route matches no rule (5 minutes, disabled).
pub const DEFAULT_ROUTE_TTL_MS: DurationMs = 300_000;

/// Cache behaviour for one route prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteCacheConfig {
    pub ttl_ms: DurationMs,
    pub enabled: bool,
}

impl RouteCacheConfig {
    pub fn enabled(ttl: Duration) -> Self {
        Self {
            ttl_ms: ttl.as_millis() as DurationMs,
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            ttl_ms: DEFAULT_ROUTE_TTL_MS,
            enabled: false,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Whether responses on this route may be stored at all.
    pub fn is_cacheable(&self) -> bool {
        self.enabled && self.ttl_ms > 0
    }
}

/// A `(prefix, config)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub prefix: String,
    #[serde(flatten)]
    pub config: RouteCacheConfig,
}

/// Ordered route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
    fallback: RouteCacheConfig,
}

impl RouteTable {
    /// Empty table where every route is disabled.
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            fallback: RouteCacheConfig::disabled(),
        }
    }

    /// Add or replace the rule for `prefix`.
    pub fn with_rule(mut self, prefix: impl Into<String>, config: RouteCacheConfig) -> Self {
        self.insert(prefix, config);
        self
    }

    pub fn insert(&mut self, prefix: impl Into<String>, config: RouteCacheConfig) {
        let prefix = prefix.into();
        self.rules.retain(|r| r.prefix != prefix);
        self.rules.push(RouteRule { prefix, config });
        // Longest prefix first; ties broken lexically so ordering is total.
        self.rules.sort_by(|a, b| {
            b.prefix
                .len()
                .cmp(&a.prefix.len())
                .then_with(|| a.prefix.cmp(&b.prefix))
        });
    }

    /// Resolve the configuration for a request path (without query string).
    pub fn resolve(&self, path: &str) -> RouteCacheConfig {
        self.rules
            .iter()
            .find(|r| path.starts_with(r.prefix.as_str()))
            .map(|r| r.config)
            .unwrap_or(self.fallback)
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn fallback(&self) -> RouteCacheConfig {
        self.fallback
    }

    /// Apply overrides of the form `prefix=ttl_ms,prefix=ttl_ms`.
    ///
    /// A TTL of `0` disables the prefix.
    pub fn apply_overrides(&mut self, spec: &str) -> Result<(), ConfigError> {
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (prefix, ttl) = entry.split_once('=').ok_or_else(|| ConfigError::InvalidValue {
                field: "cache_routes".to_string(),
                value: entry.to_string(),
                reason: "expected prefix=ttl_ms".to_string(),
            })?;
            let prefix = prefix.trim();
            if !prefix.starts_with('/') {
                return Err(ConfigError::InvalidValue {
                    field: "cache_routes".to_string(),
                    value: entry.to_string(),
                    reason: "prefix must start with '/'".to_string(),
                });
            }
            let ttl_ms: DurationMs = ttl.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: "cache_routes".to_string(),
                value: entry.to_string(),
                reason: "ttl must be a whole number of milliseconds".to_string(),
            })?;
            let config = if ttl_ms == 0 {
                RouteCacheConfig::disabled()
            } else {
                RouteCacheConfig::enabled(Duration::from_millis(ttl_ms))
            };
            self.insert(prefix, config);
        }
        Ok(())
    }
}

impl Default for RouteTable {
    /// The dashboard's standard route table.
    fn default() -> Self {
        let minutes = |m: u64| RouteCacheConfig::enabled(Duration::from_secs(m * 60));
        Self::empty()
            .with_rule("/api/dashboard", minutes(5))
            .with_rule("/api/dashboard/essential", minutes(3))
            .with_rule("/api/dashboard/secondary", minutes(5))
            .with_rule("/api/dashboard/optional", minutes(10))
            .with_rule("/api/dashboard-batch/batch", minutes(5))
            .with_rule("/api/streams", minutes(60))
            .with_rule("/api/radios", minutes(30))
    }
}
