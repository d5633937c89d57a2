//! Request fingerprinting.
//!
//! A [`CacheKey`] identifies one cacheable unit. It is derived from the
//! request method, path, caller identity, canonicalized query parameters and,
//! for `POST` reads, the canonicalized body:
//!
//! ```text
//! METHOD:path:principal:query-json:body-json
//! ```
//!
//! Each component is escaped so it can never bleed into its neighbour, and
//! query/body are serialized with a stable field order so that two requests
//! differing only in parameter order share a key.

use crate::identity::{principal_segment, Principal};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Longest raw key that is echoed verbatim in a response header.
const MAX_HEADER_KEY_LEN: usize = 1024;

// ============================================================================
// CACHE KEY
// ============================================================================

/// Canonical cache key string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an already-canonical key, e.g. a named client query like `songs-ranking`.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Method component of a fingerprinted key.
    pub fn method(&self) -> Option<&str> {
        self.0.split(':').next().filter(|m| !m.is_empty())
    }

    /// Escaped path component of a fingerprinted key.
    pub fn path(&self) -> Option<&str> {
        self.0.split(':').nth(1)
    }

    /// SHA-256 hex digest of the key.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Representation safe to place in an HTTP header value.
    ///
    /// Short printable-ASCII keys are echoed verbatim; anything else is
    /// replaced by `sha256:<digest>`.
    pub fn header_value(&self) -> String {
        let printable = self.0.bytes().all(|b| (0x20..0x7f).contains(&b));
        if printable && self.0.len() <= MAX_HEADER_KEY_LEN {
            self.0.clone()
        } else {
            format!("sha256:{}", self.digest())
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

// ============================================================================
// QUERY PARAMETERS
// ============================================================================

/// Query parameters in canonical (sorted) order.
///
/// Repeated parameters keep their order of appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(BTreeMap<String, Vec<String>>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params = Self::new();
        for (k, v) in pairs {
            params.push(k, v);
        }
        params
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.entry(name.into()).or_default().push(value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0.get(name).map(Vec::as_slice)
    }

    /// JSON object form: single values as strings, repeated values as arrays.
    pub fn to_json(&self) -> Value {
        let map = self
            .0
            .iter()
            .map(|(k, values)| {
                let v = match values.as_slice() {
                    [single] => Value::String(single.clone()),
                    many => Value::Array(many.iter().cloned().map(Value::String).collect()),
                };
                (k.clone(), v)
            })
            .collect();
        Value::Object(map)
    }
}

// ============================================================================
// FINGERPRINTING
// ============================================================================

/// Serialize a JSON value with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Escape the key separator (and the escape character itself) in a path.
pub fn escape_segment(raw: &str) -> String {
    raw.replace('%', "%25").replace(':', "%3A")
}

/// Derive the cache key for a request.
///
/// `body` only participates for `POST`, where it expresses a cacheable read
/// (an absent POST body is treated as `{}`); every other method leaves the
/// body slot empty.
pub fn fingerprint(
    method: &str,
    path: &str,
    principal: Option<&Principal>,
    query: &QueryParams,
    body: Option<&Value>,
) -> CacheKey {
    let method = method.to_ascii_uppercase();
    let body_segment = if method == "POST" {
        match body {
            Some(value) => canonical_json(value),
            None => "{}".to_string(),
        }
    } else {
        String::new()
    };

    CacheKey(format!(
        "{}:{}:{}:{}:{}",
        method,
        escape_segment(path),
        principal_segment(principal),
        canonical_json(&query.to_json()),
        body_segment,
    ))
}
