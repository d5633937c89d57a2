//! Caller identity carried into cache keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel used in cache keys when a request carries no identity.
///
/// `@` is always percent-encoded in a principal's key segment, so no
/// authenticated principal can ever render to this value.
pub const ANONYMOUS_PRINCIPAL: &str = "@anonymous";

/// Authenticated caller identity as established by the auth layer.
///
/// The cache only needs an opaque, stable identifier. It is inserted into
/// request extensions upstream and never read from client headers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key segment for this principal.
    pub fn key_segment(&self) -> String {
        urlencoding::encode(&self.0).into_owned()
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key segment for an optional principal, falling back to the anonymous sentinel.
pub(crate) fn principal_segment(principal: Option<&Principal>) -> String {
    match principal {
        Some(p) => p.key_segment(),
        None => ANONYMOUS_PRINCIPAL.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_escapes_separator() {
        let p = Principal::new("tenant:42");
        assert_eq!(p.key_segment(), "tenant%3A42");
    }

    #[test]
    fn test_literal_sentinel_does_not_collide() {
        let p = Principal::new(ANONYMOUS_PRINCIPAL);
        assert_ne!(principal_segment(Some(&p)), principal_segment(None));
    }
}
