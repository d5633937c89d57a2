//! Invalidation events.

use crate::cache::KeyPattern;
use chrono::Utc;
use serde::Serialize;
use tunewatch_core::{CacheKey, Principal, Timestamp};

/// What an invalidation pass covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "targets", rename_all = "snake_case")]
pub enum InvalidationScope {
    Keys(Vec<CacheKey>),
    Patterns(Vec<KeyPattern>),
    All,
}

impl InvalidationScope {
    /// Patterns equivalent to this scope; `None` for [`InvalidationScope::All`].
    pub fn patterns(&self) -> Option<Vec<KeyPattern>> {
        match self {
            Self::Keys(keys) => Some(keys.iter().map(KeyPattern::from).collect()),
            Self::Patterns(patterns) => Some(patterns.clone()),
            Self::All => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Keys(keys) => keys.is_empty(),
            Self::Patterns(patterns) => patterns.is_empty(),
            Self::All => false,
        }
    }
}

/// One invalidation pass, consumed once by each subscriber and then discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidationEvent {
    pub mutation_type: Option<String>,
    pub scope: InvalidationScope,
    pub origin: Option<Principal>,
    pub timestamp: Timestamp,
}

impl InvalidationEvent {
    pub fn new(scope: InvalidationScope) -> Self {
        Self {
            mutation_type: None,
            scope,
            origin: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_mutation_type(mut self, mutation_type: impl Into<String>) -> Self {
        self.mutation_type = Some(mutation_type.into());
        self
    }

    pub fn with_origin(mut self, origin: Option<Principal>) -> Self {
        self.origin = origin;
        self
    }
}
