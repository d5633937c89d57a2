//! Key patterns used to select cache entries for invalidation.

use regex::Regex;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;
use tunewatch_core::{escape_segment, CacheError, CacheKey};

/// Selects a set of cache keys.
#[derive(Debug, Clone)]
pub enum KeyPattern {
    /// Exactly one key.
    Exact(String),

    /// A hierarchical client key and everything below it.
    ///
    /// Client query keys are `/`-separated (`dashboard/essential/metrics`).
    /// `Prefix("dashboard")` matches `dashboard` and `dashboard/...` but not
    /// `dashboard-batch`.
    Prefix(String),

    /// Fingerprinted server keys whose path starts with the prefix.
    ///
    /// Matches keys of the form `METHOD:<path>:...` for any method. This is a
    /// plain string prefix on the path, so `/api/dashboard` also covers
    /// `/api/dashboard-batch/batch`.
    PathPrefix(String),

    /// Unanchored regular expression tested against the full key.
    Regex(Regex),
}

impl KeyPattern {
    pub fn exact(key: impl Into<String>) -> Self {
        Self::Exact(key.into())
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    pub fn path_prefix(prefix: impl Into<String>) -> Self {
        Self::PathPrefix(prefix.into())
    }

    /// Compile a regex pattern.
    pub fn regex(pattern: &str) -> Result<Self, CacheError> {
        Regex::new(pattern)
            .map(Self::Regex)
            .map_err(|e| CacheError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(exact) => key == exact,
            Self::Prefix(prefix) => {
                key == prefix
                    || (key.starts_with(prefix.as_str())
                        && key[prefix.len()..].starts_with('/'))
            }
            Self::PathPrefix(prefix) => {
                let mut parts = key.splitn(3, ':');
                let method = parts.next().unwrap_or_default();
                let path = parts.next();
                match path {
                    Some(path) if !method.is_empty() && method.bytes().all(|b| b.is_ascii_uppercase()) => {
                        path.starts_with(escape_segment(prefix).as_str())
                    }
                    _ => false,
                }
            }
            Self::Regex(regex) => regex.is_match(key),
        }
    }

    pub fn matches_key(&self, key: &CacheKey) -> bool {
        self.matches(key.as_str())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Exact(_) => "exact",
            Self::Prefix(_) => "prefix",
            Self::PathPrefix(_) => "path_prefix",
            Self::Regex(_) => "regex",
        }
    }

    /// Source text of the pattern.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact(s) | Self::Prefix(s) | Self::PathPrefix(s) => s,
            Self::Regex(regex) => regex.as_str(),
        }
    }
}

impl PartialEq for KeyPattern {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.as_str() == other.as_str()
    }
}

impl Eq for KeyPattern {}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.as_str())
    }
}

impl Serialize for KeyPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("KeyPattern", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("pattern", self.as_str())?;
        s.end()
    }
}

impl From<&CacheKey> for KeyPattern {
    fn from(key: &CacheKey) -> Self {
        Self::Exact(key.as_str().to_string())
    }
}
