//! API Configuration Module
//!
//! Cache, invalidation and CORS settings for the API server. Configuration is
//! loaded from environment variables with defaults suitable for development.

use axum::http::HeaderName;
use std::time::Duration;
use tunewatch_core::{ConfigError, RouteTable};
use tunewatch_storage::{KeyPattern, DEFAULT_DEBOUNCE_WINDOW};

/// Default largest request body buffered for POST fingerprinting (1MB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

// ============================================================================
// API CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // Response Cache
    // ========================================================================
    /// Master switch; when off the cache middleware passes everything through.
    pub cache_enabled: bool,

    /// Per-route TTL table.
    pub routes: RouteTable,

    /// Largest request/response body the cache middleware will buffer.
    pub max_body_bytes: usize,

    // ========================================================================
    // Invalidation
    // ========================================================================
    /// Route prefixes purged after every acknowledged mutation.
    pub auto_invalidate_prefixes: Vec<String>,

    /// Window for collapsing repeated invalidations of one pattern.
    pub debounce_window: Duration,

    // ========================================================================
    // Identity
    // ========================================================================
    /// Header carrying the authenticated user id, set by the fronting gateway.
    /// `None` means every request is anonymous.
    pub trusted_principal_header: Option<HeaderName>,

    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins. Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            routes: RouteTable::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            auto_invalidate_prefixes: vec!["/api/dashboard".to_string()],
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            trusted_principal_header: None,
            cors_origins: Vec::new(),
            cors_max_age_secs: 86400,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TUNEWATCH_CACHE_ENABLED`: "true" or "false" (default: true)
    /// - `TUNEWATCH_CACHE_ROUTES`: `prefix=ttl_ms,...` overrides on the default table (0 disables)
    /// - `TUNEWATCH_CACHE_MAX_BODY_BYTES`: body buffering limit (default: 1048576)
    /// - `TUNEWATCH_CACHE_AUTO_INVALIDATE`: comma-separated prefixes (default: /api/dashboard)
    /// - `TUNEWATCH_CACHE_DEBOUNCE_MS`: debounce window (default: 500)
    /// - `TUNEWATCH_TRUSTED_PRINCIPAL_HEADER`: gateway-set user id header (default: unset)
    /// - `TUNEWATCH_CORS_ORIGINS`: comma-separated allowed origins (empty = allow all)
    /// - `TUNEWATCH_CORS_MAX_AGE_SECS`: preflight cache duration (default: 86400)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let cache_enabled = lookup("TUNEWATCH_CACHE_ENABLED")
            .map(|s| parse_bool("TUNEWATCH_CACHE_ENABLED", &s))
            .transpose()?
            .unwrap_or(defaults.cache_enabled);

        let mut routes = defaults.routes;
        if let Some(spec) = lookup("TUNEWATCH_CACHE_ROUTES") {
            routes.apply_overrides(&spec)?;
        }

        let max_body_bytes = lookup("TUNEWATCH_CACHE_MAX_BODY_BYTES")
            .map(|s| parse_number("TUNEWATCH_CACHE_MAX_BODY_BYTES", &s))
            .transpose()?
            .unwrap_or(defaults.max_body_bytes);

        let auto_invalidate_prefixes = lookup("TUNEWATCH_CACHE_AUTO_INVALIDATE")
            .map(|s| split_list(&s))
            .unwrap_or(defaults.auto_invalidate_prefixes);
        if let Some(bad) = auto_invalidate_prefixes.iter().find(|p| !p.starts_with('/')) {
            return Err(ConfigError::InvalidValue {
                field: "TUNEWATCH_CACHE_AUTO_INVALIDATE".to_string(),
                value: bad.clone(),
                reason: "prefix must start with '/'".to_string(),
            });
        }

        let debounce_window = lookup("TUNEWATCH_CACHE_DEBOUNCE_MS")
            .map(|s| parse_number("TUNEWATCH_CACHE_DEBOUNCE_MS", &s))
            .transpose()?
            .map(Duration::from_millis)
            .unwrap_or(defaults.debounce_window);

        let trusted_principal_header = match lookup("TUNEWATCH_TRUSTED_PRINCIPAL_HEADER") {
            Some(name) if !name.trim().is_empty() => {
                let parsed = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| {
                    ConfigError::InvalidValue {
                        field: "TUNEWATCH_TRUSTED_PRINCIPAL_HEADER".to_string(),
                        value: name.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Some(parsed)
            }
            _ => None,
        };

        let cors_origins = lookup("TUNEWATCH_CORS_ORIGINS")
            .map(|s| split_list(&s))
            .unwrap_or_default();

        let cors_max_age_secs = lookup("TUNEWATCH_CORS_MAX_AGE_SECS")
            .map(|s| parse_number("TUNEWATCH_CORS_MAX_AGE_SECS", &s))
            .transpose()?
            .unwrap_or(defaults.cors_max_age_secs);

        Ok(Self {
            cache_enabled,
            routes,
            max_body_bytes,
            auto_invalidate_prefixes,
            debounce_window,
            trusted_principal_header,
            cors_origins,
            cors_max_age_secs,
        })
    }

    /// Auto-invalidation prefixes as key patterns.
    pub fn auto_invalidate_patterns(&self) -> Vec<KeyPattern> {
        self.auto_invalidate_prefixes
            .iter()
            .map(KeyPattern::path_prefix)
            .collect()
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }
        self.cors_origins.iter().any(|allowed| allowed == origin)
    }
}

fn parse_bool(field: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: raw.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(field: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: raw.to_string(),
        reason: "expected a non-negative whole number".to_string(),
    })
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ApiConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.cache_enabled);
        assert_eq!(config.debounce_window, Duration::from_millis(500));
        assert_eq!(config.routes.resolve("/api/streams").ttl_ms, 3_600_000);
        assert_eq!(
            config.auto_invalidate_patterns(),
            vec![KeyPattern::path_prefix("/api/dashboard")]
        );
        assert!(!config.is_production());
    }

    #[test]
    fn test_env_overrides() {
        let config = ApiConfig::from_lookup(lookup(&[
            ("TUNEWATCH_CACHE_ENABLED", "false"),
            ("TUNEWATCH_CACHE_ROUTES", "/api/radios=1000"),
            ("TUNEWATCH_CACHE_DEBOUNCE_MS", "50"),
            ("TUNEWATCH_CACHE_AUTO_INVALIDATE", "/api/dashboard, /api/streams"),
            ("TUNEWATCH_CORS_ORIGINS", "https://tunewatch.app"),
            ("TUNEWATCH_TRUSTED_PRINCIPAL_HEADER", "X-Authenticated-User"),
        ]))
        .unwrap();
        assert!(!config.cache_enabled);
        assert_eq!(config.routes.resolve("/api/radios").ttl_ms, 1000);
        assert_eq!(config.debounce_window, Duration::from_millis(50));
        assert_eq!(config.auto_invalidate_prefixes.len(), 2);
        assert!(config.is_origin_allowed("https://tunewatch.app"));
        assert!(!config.is_origin_allowed("https://evil.example"));
        assert_eq!(
            config.trusted_principal_header.as_ref().map(|h| h.as_str()),
            Some("x-authenticated-user")
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(ApiConfig::from_lookup(lookup(&[("TUNEWATCH_CACHE_ROUTES", "radios")])).is_err());
        assert!(
            ApiConfig::from_lookup(lookup(&[("TUNEWATCH_CACHE_AUTO_INVALIDATE", "api")])).is_err()
        );
        assert!(ApiConfig::from_lookup(lookup(&[(
            "TUNEWATCH_TRUSTED_PRINCIPAL_HEADER",
            "bad header"
        )]))
        .is_err());
    }

    #[test]
    fn test_malformed_numbers_fail_instead_of_defaulting() {
        for name in [
            "TUNEWATCH_CACHE_MAX_BODY_BYTES",
            "TUNEWATCH_CACHE_DEBOUNCE_MS",
            "TUNEWATCH_CORS_MAX_AGE_SECS",
        ] {
            match ApiConfig::from_lookup(lookup(&[(name, "lots")])) {
                Err(ConfigError::InvalidValue { field, value, .. }) => {
                    assert_eq!(field, name);
                    assert_eq!(value, "lots");
                }
                other => panic!("{} accepted a malformed value: {:?}", name, other),
            }
        }
        assert!(ApiConfig::from_lookup(lookup(&[("TUNEWATCH_CACHE_DEBOUNCE_MS", "-5")])).is_err());
    }

    #[test]
    fn test_cache_switch_requires_a_boolean() {
        let err = ApiConfig::from_lookup(lookup(&[("TUNEWATCH_CACHE_ENABLED", "nope")]));
        assert!(matches!(err, Err(ConfigError::InvalidValue { .. })));

        let off = ApiConfig::from_lookup(lookup(&[("TUNEWATCH_CACHE_ENABLED", " 0 ")])).unwrap();
        assert!(!off.cache_enabled);
        let on = ApiConfig::from_lookup(lookup(&[("TUNEWATCH_CACHE_ENABLED", "TRUE")])).unwrap();
        assert!(on.cache_enabled);
    }
}
