//! In-memory TTL cache with pattern invalidation.
//!
//! # Expiry
//!
//! Every entry carries an absolute deadline and exactly one expiry timer.
//! Re-setting a key replaces the value and the deadline and cancels the old
//! timer; there is no TTL extension. Timers are generation-checked, so a timer
//! that was already running when it got cancelled can never remove the entry
//! that replaced it. Reads re-check the deadline, so an entry is never
//! returned once it has expired even if its timer has not fired yet.
//!
//! # Invalidation races
//!
//! A response computed before an overlapping invalidation must not be stored
//! after it. Writers capture a [`Watermark`] before computing and store with
//! [`TtlCacheStore::set_unless_invalidated`], which rejects the write if any
//! invalidation since that watermark matches the key.
//!
//! # Example
//!
//! ```ignore
//! let store: TtlCacheStore<serde_json::Value> = TtlCacheStore::new();
//! store.set("GET:/api/radios:@anonymous:{}:", json!([1, 2]), Duration::from_secs(60));
//! let removed = store.invalidate_pattern(&KeyPattern::path_prefix("/api/radios"));
//! ```

pub mod pattern;
pub mod stats;
pub mod store;

pub use pattern::KeyPattern;
pub use stats::CacheStats;
pub use store::{CacheEntry, TtlCacheStore, Watermark};
