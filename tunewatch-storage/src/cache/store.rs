//! TTL cache store with per-entry expiry timers.

use super::pattern::KeyPattern;
use super::stats::{CacheStats, Counters};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tunewatch_core::CacheError;

/// How many recent invalidations are retained for race detection.
const INVALIDATION_LOG_CAPACITY: usize = 256;

/// Deadline used when `now + ttl` would overflow.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

// ============================================================================
// ENTRY TYPES
// ============================================================================

/// A point in the store's invalidation history.
///
/// Watermarks are monotonically increasing; every pattern invalidation and
/// every clear advances the sequence by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Watermark {
    pub sequence: u64,
}

impl Watermark {
    pub fn zero() -> Self {
        Self { sequence: 0 }
    }

    pub fn is_newer_than(&self, other: &Watermark) -> bool {
        self.sequence > other.sequence
    }
}

/// A stored value with its lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: Instant,
    pub expires_at: Instant,
    /// Key length plus serialized value length, in bytes.
    pub size_estimate: usize,
}

impl<V> CacheEntry<V> {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

struct Slot<V> {
    entry: CacheEntry<V>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl<V> Slot<V> {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

enum Invalidated {
    Pattern(KeyPattern),
    All,
}

struct InvalidationLog {
    sequence: u64,
    records: VecDeque<(u64, Invalidated)>,
}

impl InvalidationLog {
    fn new() -> Self {
        Self {
            sequence: 0,
            records: VecDeque::with_capacity(INVALIDATION_LOG_CAPACITY),
        }
    }

    fn record(&mut self, what: Invalidated) -> Watermark {
        self.sequence += 1;
        self.records.push_back((self.sequence, what));
        while self.records.len() > INVALIDATION_LOG_CAPACITY {
            self.records.pop_front();
        }
        Watermark {
            sequence: self.sequence,
        }
    }

    fn invalidated_since(&self, since: Watermark, key: &str) -> bool {
        if self.sequence <= since.sequence {
            return false;
        }
        // History older than the log was dropped; assume the worst.
        match self.records.front() {
            Some((oldest, _)) if *oldest <= since.sequence + 1 => {}
            _ => return true,
        }
        self.records
            .iter()
            .filter(|(seq, _)| *seq > since.sequence)
            .any(|(_, what)| match what {
                Invalidated::All => true,
                Invalidated::Pattern(pattern) => pattern.matches(key),
            })
    }
}

struct Inner<V> {
    entries: DashMap<String, Slot<V>>,
    counters: Counters,
    next_generation: AtomicU64,
    log: Mutex<InvalidationLog>,
}

impl<V> Inner<V> {
    fn expire(&self, key: &str, generation: u64) {
        if self
            .entries
            .remove_if(key, |_, slot| slot.generation == generation)
            .is_some()
        {
            Counters::bump(&self.counters.expirations);
            tracing::debug!(key, "cache entry expired");
        }
    }
}

impl<V> Drop for Inner<V> {
    fn drop(&mut self) {
        for mut slot in self.entries.iter_mut() {
            slot.cancel_timer();
        }
    }
}

// ============================================================================
// STORE
// ============================================================================

/// In-memory key/value store with per-entry TTL.
///
/// Cloning is cheap and yields a handle onto the same store.
pub struct TtlCacheStore<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for TtlCacheStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> std::fmt::Debug for TtlCacheStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCacheStore")
            .field("size", &self.inner.entries.len())
            .finish()
    }
}

impl<V> Default for TtlCacheStore<V>
where
    V: Clone + Serialize + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> TtlCacheStore<V>
where
    V: Clone + Serialize + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                counters: Counters::default(),
                next_generation: AtomicU64::new(1),
                log: Mutex::new(InvalidationLog::new()),
            }),
        }
    }

    /// Read a live entry.
    ///
    /// An entry past its deadline is evicted on the spot and counted as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let expired = match self.inner.entries.get(key) {
            Some(slot) if !slot.entry.is_expired_at(now) => {
                let value = slot.entry.value.clone();
                drop(slot);
                Counters::bump(&self.inner.counters.hits);
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            if let Some((_, mut slot)) = self
                .inner
                .entries
                .remove_if(key, |_, slot| slot.entry.is_expired_at(now))
            {
                slot.cancel_timer();
                Counters::bump(&self.inner.counters.expirations);
            }
        }
        Counters::bump(&self.inner.counters.misses);
        None
    }

    /// Store `value` under `key` for `ttl`, replacing any previous entry and its timer.
    ///
    /// A zero TTL means "do not cache": nothing is stored and any existing
    /// entry for the key is dropped as expired.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.insert(key.into(), value, ttl);
    }

    /// Store `value` only if no invalidation since `since` matched `key`.
    pub fn set_unless_invalidated(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Duration,
        since: Watermark,
    ) -> Result<(), CacheError> {
        let key = key.into();
        let log = self.inner.log.lock().unwrap_or_else(|e| e.into_inner());
        if log.invalidated_since(since, &key) {
            tracing::debug!(key = %key, since = since.sequence, "discarding response computed before invalidation");
            return Err(CacheError::InvalidationRace { key });
        }
        // Inserting under the log lock orders this write against concurrent invalidations.
        self.insert(key, value, ttl);
        drop(log);
        Ok(())
    }

    fn insert(&self, key: String, value: V, ttl: Duration) {
        if ttl.is_zero() {
            if let Some((_, mut slot)) = self.inner.entries.remove(&key) {
                slot.cancel_timer();
                Counters::bump(&self.inner.counters.expirations);
            }
            tracing::debug!(key = %key, "zero ttl, not cached");
            return;
        }

        let now = Instant::now();
        let expires_at = now.checked_add(ttl).unwrap_or_else(|| now + FAR_FUTURE);
        let size_estimate = estimate_size(&key, &value);
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let slot = Slot {
            entry: CacheEntry {
                key: key.clone(),
                value,
                created_at: now,
                expires_at,
                size_estimate,
            },
            generation,
            timer: None,
        };

        // The shard stays locked until the new timer is attached, so the
        // timer can never observe the key without its own slot in place.
        let mut guard = match self.inner.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().cancel_timer();
                occupied.insert(slot);
                occupied.into_ref()
            }
            Entry::Vacant(vacant) => vacant.insert(slot),
        };
        guard.timer = self.arm_timer(key, generation, expires_at);
        drop(guard);

        Counters::bump(&self.inner.counters.sets);
    }

    /// The deadline is absolute so the timer agrees with `expires_at` however
    /// late the task is first polled.
    fn arm_timer(&self, key: String, generation: u64, expires_at: Instant) -> Option<JoinHandle<()>> {
        // Without a runtime, reads still enforce the deadline lazily.
        let handle = Handle::try_current().ok()?;
        let weak: Weak<Inner<V>> = Arc::downgrade(&self.inner);
        Some(handle.spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire(&key, generation);
            }
        }))
    }

    /// Remove an entry and cancel its timer. Returns whether anything was removed.
    pub fn delete(&self, key: &str) -> bool {
        match self.inner.entries.remove(key) {
            Some((_, mut slot)) => {
                slot.cancel_timer();
                Counters::bump(&self.inner.counters.deletes);
                true
            }
            None => false,
        }
    }

    /// Remove every entry whose key matches `pattern`. Returns the count removed.
    pub fn invalidate_pattern(&self, pattern: &KeyPattern) -> usize {
        self.record(Invalidated::Pattern(pattern.clone()));

        let removed = match pattern {
            KeyPattern::Exact(key) => usize::from(self.remove_quietly(key)),
            _ => {
                let keys: Vec<String> = self
                    .inner
                    .entries
                    .iter()
                    .filter(|slot| pattern.matches(slot.key()))
                    .map(|slot| slot.key().clone())
                    .collect();
                keys.iter().filter(|key| self.remove_quietly(key)).count()
            }
        };

        Counters::add(&self.inner.counters.deletes, removed as u64);
        tracing::debug!(pattern = %pattern, removed, "invalidated cache entries");
        removed
    }

    fn remove_quietly(&self, key: &str) -> bool {
        match self.inner.entries.remove(key) {
            Some((_, mut slot)) => {
                slot.cancel_timer();
                true
            }
            None => false,
        }
    }

    /// Cancel every timer, drop every entry and reset the counters.
    pub fn clear(&self) -> usize {
        self.record(Invalidated::All);
        let mut removed = 0;
        self.inner.entries.retain(|_, slot| {
            slot.cancel_timer();
            removed += 1;
            false
        });
        self.inner.counters.reset();
        tracing::info!(removed, "cache cleared");
        removed
    }

    fn record(&self, what: Invalidated) -> Watermark {
        self.inner
            .log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(what)
    }

    /// Current position in the invalidation history.
    pub fn watermark(&self) -> Watermark {
        let log = self.inner.log.lock().unwrap_or_else(|e| e.into_inner());
        Watermark {
            sequence: log.sequence,
        }
    }

    pub fn stats(&self) -> CacheStats {
        let mut size = 0usize;
        let mut bytes = 0u64;
        for slot in self.inner.entries.iter() {
            size += 1;
            bytes += slot.entry.size_estimate as u64;
        }
        self.inner.counters.snapshot(size, bytes)
    }

    /// Time left before `key` expires, without touching the counters.
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.inner
            .entries
            .get(key)
            .filter(|slot| !slot.entry.is_expired_at(now))
            .map(|slot| slot.entry.remaining_at(now))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.remaining_ttl(key).is_some()
    }

    /// Number of entries held, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.entries.iter().map(|slot| slot.key().clone()).collect()
    }
}

fn estimate_size<V: Serialize>(key: &str, value: &V) -> usize {
    let value_len = match serde_json::to_vec(value) {
        Ok(bytes) => bytes.len(),
        Err(err) => {
            tracing::warn!(key, error = %err, "could not size cache value");
            0
        }
    };
    key.len() + value_len
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_before_and_after_ttl() {
        let store: TtlCacheStore<Value> = TtlCacheStore::new();
        store.set("k", json!({"a": 1}), Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(store.get("k"), Some(json!({"a": 1})));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k"), None);

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_replaces_ttl() {
        let store: TtlCacheStore<Value> = TtlCacheStore::new();
        store.set("k", json!("v1"), Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(5)).await;
        store.set("k", json!("v2"), Duration::from_secs(10));

        // Past the first deadline: the first timer must not fire.
        tokio::time::advance(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("k"), Some(json!("v2")));

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(store.len(), 0);
        assert_eq!(store.get("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_evicts_without_read() {
        let store: TtlCacheStore<Value> = TtlCacheStore::new();
        store.set("k", json!(1), Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(store.is_empty());
        assert_eq!(store.stats().expirations, 1);
        assert_eq!(store.stats().misses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_deadline_matches_expires_at() {
        let store: TtlCacheStore<Value> = TtlCacheStore::new();
        store.set("k", json!(1), Duration::from_secs(1));
        // The timer task has not been polled yet when the clock moves.
        tokio::time::advance(Duration::from_millis(1001)).await;
        settle().await;
        assert!(store.is_empty());
        assert_eq!(store.stats().expirations, 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_does_not_cache() {
        let store: TtlCacheStore<Value> = TtlCacheStore::new();
        store.set("k", json!(1), Duration::from_secs(60));
        store.set("k", json!(2), Duration::ZERO);
        assert_eq!(store.get("k"), None);
        assert_eq!(store.stats().sets, 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store: TtlCacheStore<Value> = TtlCacheStore::new();
        store.set("k", json!(1), Duration::from_secs(60));
        assert!(store.delete("k"));
        assert!(!store.delete("k"));
        assert_eq!(store.stats().deletes, 1);
    }

    #[tokio::test]
    async fn test_invalidate_pattern_is_exact() {
        let store: TtlCacheStore<Value> = TtlCacheStore::new();
        let ttl = Duration::from_secs(60);
        store.set("GET:/api/dashboard:@anonymous:{}:", json!(1), ttl);
        store.set("GET:/api/dashboard/essential:u1:{}:", json!(2), ttl);
        store.set("GET:/api/radios:@anonymous:{}:", json!(3), ttl);

        let removed = store.invalidate_pattern(&KeyPattern::path_prefix("/api/dashboard"));
        assert_eq!(removed, 2);
        assert_eq!(store.keys(), vec!["GET:/api/radios:@anonymous:{}:".to_string()]);
        assert_eq!(store.stats().deletes, 2);
    }

    #[tokio::test]
    async fn test_clear_resets_stats() {
        let store: TtlCacheStore<Value> = TtlCacheStore::new();
        store.set("a", json!(1), Duration::from_secs(60));
        store.set("b", json!(2), Duration::from_secs(60));
        store.get("a");
        store.get("zzz");
        assert_eq!(store.clear(), 2);
        assert_eq!(store.stats(), CacheStats::default());
    }

    #[tokio::test]
    async fn test_memory_estimate() {
        let store: TtlCacheStore<Value> = TtlCacheStore::new();
        store.set("k", json!("ab"), Duration::from_secs(60));
        // "k" + "\"ab\""
        assert_eq!(store.stats().approx_memory_bytes, 5);
    }

    #[tokio::test]
    async fn test_set_unless_invalidated() {
        let store: TtlCacheStore<Value> = TtlCacheStore::new();
        let ttl = Duration::from_secs(60);
        let key = "GET:/api/dashboard:@anonymous:{}:";

        let before = store.watermark();
        store.invalidate_pattern(&KeyPattern::path_prefix("/api/radios"));
        assert!(store.set_unless_invalidated(key, json!(1), ttl, before).is_ok());

        let before = store.watermark();
        store.invalidate_pattern(&KeyPattern::path_prefix("/api/dashboard"));
        let err = store.set_unless_invalidated(key, json!(2), ttl, before);
        assert!(matches!(err, Err(CacheError::InvalidationRace { .. })));
        assert_eq!(store.get(key), None);

        let before = store.watermark();
        store.clear();
        assert!(store.set_unless_invalidated("other", json!(3), ttl, before).is_err());
    }

    #[tokio::test]
    async fn test_truncated_log_is_conservative() {
        let store: TtlCacheStore<Value> = TtlCacheStore::new();
        let before = store.watermark();
        for i in 0..(INVALIDATION_LOG_CAPACITY + 5) {
            store.invalidate_pattern(&KeyPattern::exact(format!("unrelated-{}", i)));
        }
        assert!(store
            .set_unless_invalidated("k", json!(1), Duration::from_secs(1), before)
            .is_err());
    }

    #[test]
    fn test_works_without_runtime() {
        let store: TtlCacheStore<Value> = TtlCacheStore::new();
        store.set("k", json!(1), Duration::from_millis(5));
        assert_eq!(store.get("k"), Some(json!(1)));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.get("k"), None);
        assert!(store.is_empty());
    }
}
