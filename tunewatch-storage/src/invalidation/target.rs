//! Things that hold cached data and can be told to drop some of it.

use crate::cache::{KeyPattern, TtlCacheStore};
use serde::Serialize;

/// A cache tier that accepts invalidation passes.
pub trait InvalidationTarget: Send + Sync {
    /// Short name used in reports and logs.
    fn name(&self) -> &str;

    /// Remove entries matching `pattern`, returning how many were removed.
    fn invalidate(&self, pattern: &KeyPattern) -> usize;

    /// Remove everything, returning how many entries were removed.
    fn invalidate_all(&self) -> usize;
}

impl<V> InvalidationTarget for TtlCacheStore<V>
where
    V: Clone + Serialize + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "response-cache"
    }

    fn invalidate(&self, pattern: &KeyPattern) -> usize {
        self.invalidate_pattern(pattern)
    }

    fn invalidate_all(&self) -> usize {
        self.clear()
    }
}
