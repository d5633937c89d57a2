//! Cache warming.
//!
//! Populates the query cache ahead of demand from four triggers: login
//! (a starter set per role), navigation (likely next views), idle time
//! (optional-priority queries) and a per-caller access-frequency table.
//! Warming is best effort: failures are logged at debug and counted, never
//! returned.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tunewatch_core::{Clock, Principal, Priority, Timestamp};

use crate::config::WarmingConfig;
use crate::query_cache::QueryCache;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmingReport {
    pub attempted: usize,
    pub warmed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl WarmingReport {
    fn absorb(&mut self, result: WarmResult) {
        match result {
            WarmResult::Skipped => self.skipped += 1,
            WarmResult::Warmed => {
                self.attempted += 1;
                self.warmed += 1;
            }
            WarmResult::Failed => {
                self.attempted += 1;
                self.failed += 1;
            }
        }
    }
}

enum WarmResult {
    Warmed,
    Skipped,
    Failed,
}

// ============================================================================
// ACCESS LOG
// ============================================================================

/// Principals tracked before the least recently active one is dropped.
pub const MAX_TRACKED_PRINCIPALS: usize = 64;

/// Keys tracked per principal before the least accessed one is dropped.
pub const MAX_KEYS_PER_PRINCIPAL: usize = 128;

#[derive(Debug, Default)]
struct AccessCounts {
    counts: HashMap<String, u64>,
    last_seen: u64,
}

#[derive(Debug, Default)]
struct AccessTable {
    tick: u64,
    principals: HashMap<Principal, AccessCounts>,
}

/// Bounded per-principal access counts feeding adaptive warming.
///
/// The query cache records every user fetch made while a principal is
/// signed in.
#[derive(Debug)]
pub struct AccessLog {
    table: Mutex<AccessTable>,
    max_principals: usize,
    max_keys: usize,
}

impl Default for AccessLog {
    fn default() -> Self {
        Self::with_limits(MAX_TRACKED_PRINCIPALS, MAX_KEYS_PER_PRINCIPAL)
    }
}

impl AccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_principals: usize, max_keys: usize) -> Self {
        Self {
            table: Mutex::new(AccessTable::default()),
            max_principals: max_principals.max(1),
            max_keys: max_keys.max(1),
        }
    }

    pub fn record(&self, principal: &Principal, key: &str) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.tick += 1;
        let tick = table.tick;

        if !table.principals.contains_key(principal) && table.principals.len() >= self.max_principals {
            let idle = table
                .principals
                .iter()
                .min_by_key(|(_, counts)| counts.last_seen)
                .map(|(p, _)| p.clone());
            if let Some(idle) = idle {
                table.principals.remove(&idle);
            }
        }

        let entry = table.principals.entry(principal.clone()).or_default();
        entry.last_seen = tick;
        if !entry.counts.contains_key(key) && entry.counts.len() >= self.max_keys {
            let coldest = entry
                .counts
                .iter()
                .min_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
                .map(|(k, _)| k.clone());
            if let Some(coldest) = coldest {
                entry.counts.remove(&coldest);
            }
        }
        *entry.counts.entry(key.to_string()).or_insert(0) += 1;
    }

    /// Keys ordered by access count, ties broken alphabetically.
    pub fn frequent(&self, principal: &Principal, limit: usize) -> Vec<String> {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = table.principals.get(principal) else {
            return Vec::new();
        };
        let mut ranked: Vec<(&String, &u64)> = entry.counts.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        ranked.into_iter().take(limit).map(|(k, _)| k.clone()).collect()
    }

    pub fn principal_count(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .principals
            .len()
    }

    pub fn key_count(&self, principal: &Principal) -> usize {
        self.table
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .principals
            .get(principal)
            .map_or(0, |entry| entry.counts.len())
    }
}

// ============================================================================
// SCHEDULER
// ============================================================================

struct Inner {
    cache: QueryCache,
    config: WarmingConfig,
    clock: Arc<dyn Clock>,
    in_flight: DashMap<String, ()>,
    last_warmed: DashMap<String, Timestamp>,
}

/// Removes a key from the in-flight set when the warm finishes.
struct InFlight<'a> {
    map: &'a DashMap<String, ()>,
    key: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

#[derive(Clone)]
pub struct WarmingScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WarmingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmingScheduler")
            .field("enabled", &self.inner.config.enabled)
            .field("in_flight", &self.inner.in_flight.len())
            .finish()
    }
}

impl WarmingScheduler {
    /// Queries are looked up in `cache`'s registry by key.
    pub fn new(cache: QueryCache, config: WarmingConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                config,
                clock,
                in_flight: DashMap::new(),
                last_warmed: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &WarmingConfig {
        &self.inner.config
    }

    // ========================================================================
    // Triggers
    // ========================================================================

    /// Warm the starter set for `role`.
    pub async fn warm_on_login(&self, role: &str) -> WarmingReport {
        let keys = self
            .inner
            .config
            .starter_sets
            .get(role)
            .cloned()
            .unwrap_or_default();
        tracing::debug!(role, keys = keys.len(), "login warming");
        self.warm_keys(keys).await
    }

    /// Views reachable from `from` at or above the threshold, most likely first.
    pub fn predicted_views(&self, from: &str) -> Vec<(String, f64)> {
        let threshold = self.inner.config.navigation_threshold;
        let mut targets: Vec<(String, f64)> = self
            .inner
            .config
            .navigation
            .get(from)
            .map(|targets| {
                targets
                    .iter()
                    .filter(|(_, p)| **p >= threshold)
                    .map(|(view, p)| (view.clone(), *p))
                    .collect()
            })
            .unwrap_or_default();
        targets.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        targets
    }

    pub async fn warm_on_navigation(&self, from: &str) -> WarmingReport {
        let mut keys = Vec::new();
        for (view, _) in self.predicted_views(from) {
            if let Some(view_keys) = self.inner.config.views.get(&view) {
                for key in view_keys {
                    if !keys.contains(key) {
                        keys.push(key.clone());
                    }
                }
            }
        }
        self.warm_keys(keys).await
    }

    /// Background-fill every optional-priority query.
    pub async fn warm_idle(&self) -> WarmingReport {
        if !self.inner.cache.is_online() {
            return WarmingReport::default();
        }
        let keys = self.inner.cache.keys_with_priority(Priority::Optional);
        self.warm_keys(keys).await
    }

    /// Warm `principal`'s `limit` most accessed queries.
    pub async fn warm_adaptive(&self, principal: &Principal, limit: usize) -> WarmingReport {
        let keys = self.frequent_keys(principal, limit);
        self.warm_keys(keys).await
    }

    /// Count an access made outside [`QueryCache::fetch`].
    pub fn record_access(&self, principal: &Principal, key: &str) {
        self.inner.cache.access_log().record(principal, key);
    }

    pub fn frequent_keys(&self, principal: &Principal, limit: usize) -> Vec<String> {
        self.inner.cache.access_log().frequent(principal, limit)
    }

    /// Run [`warm_idle`](Self::warm_idle) on `config.idle_interval` until aborted.
    pub fn spawn_idle_loop(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        let interval = self.inner.config.idle_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = scheduler.warm_idle().await;
                if report.attempted > 0 {
                    tracing::debug!(warmed = report.warmed, failed = report.failed, "idle warming");
                }
            }
        })
    }

    // ========================================================================
    // Warming
    // ========================================================================

    async fn warm_keys(&self, keys: Vec<String>) -> WarmingReport {
        let mut report = WarmingReport::default();
        if !self.inner.config.enabled {
            report.skipped = keys.len();
            return report;
        }
        for result in join_all(keys.iter().map(|key| self.warm_one(key))).await {
            report.absorb(result);
        }
        report
    }

    fn cooling_down(&self, key: &str) -> bool {
        let Some(last) = self.inner.last_warmed.get(key) else {
            return false;
        };
        let elapsed = (self.inner.clock.now() - *last)
            .to_std()
            .unwrap_or_default();
        elapsed < self.inner.config.cooldown()
    }

    async fn warm_one(&self, key: &str) -> WarmResult {
        if self.cooling_down(key) {
            return WarmResult::Skipped;
        }
        let _guard = match self.inner.in_flight.entry(key.to_string()) {
            Entry::Occupied(_) => return WarmResult::Skipped,
            Entry::Vacant(slot) => {
                slot.insert(());
                InFlight {
                    map: &self.inner.in_flight,
                    key: key.to_string(),
                }
            }
        };

        match self.inner.cache.prefetch(key).await {
            Ok(fetched) => {
                self.inner
                    .last_warmed
                    .insert(key.to_string(), self.inner.clock.now());
                if fetched {
                    WarmResult::Warmed
                } else {
                    WarmResult::Skipped
                }
            }
            Err(err) => {
                tracing::debug!(key, error = %err, "warming failed");
                WarmResult::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::FallbackStore;
    use crate::offline::{Connectivity, OfflineDetector};
    use crate::query_cache::{QueryCacheSettings, QueryFetcher, TrackedQuery};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tunewatch_core::{CacheKey, FetchError, ManualClock};
    use tunewatch_storage::InMemoryKeyValueStore;

    #[derive(Default)]
    struct Counting {
        calls: AtomicU32,
    }

    #[async_trait]
    impl QueryFetcher for Counting {
        async fn fetch(&self, key: &CacheKey) -> Result<Value, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if key.as_str() == "broken" {
                Err(FetchError::status(500, "nope"))
            } else {
                Ok(json!({"key": key.as_str()}))
            }
        }
    }

    fn setup(config: WarmingConfig) -> (WarmingScheduler, QueryCache, ManualClock, Arc<Counting>) {
        let clock = ManualClock::default();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let fallback = FallbackStore::new(
            Arc::new(InMemoryKeyValueStore::new()),
            shared.clone(),
            Duration::from_secs(3600),
            Duration::from_secs(600),
        );
        let mut settings = QueryCacheSettings::default();
        settings.retry.secondary = crate::retry::RetryPolicy::none();
        let cache = QueryCache::new(settings, fallback, OfflineDetector::default());
        let fetcher = Arc::new(Counting::default());
        for (key, priority) in [
            ("songs-ranking", Priority::Essential),
            ("radios", Priority::Secondary),
            ("reports", Priority::Secondary),
            ("genres", Priority::Optional),
            ("broken", Priority::Secondary),
        ] {
            cache.register(TrackedQuery::new(key, fetcher.clone()).with_priority(priority));
        }
        let scheduler = WarmingScheduler::new(cache.clone(), config, shared);
        (scheduler, cache, clock, fetcher)
    }

    fn config() -> WarmingConfig {
        let mut config = WarmingConfig::default();
        config
            .starter_sets
            .insert("admin".to_string(), vec!["songs-ranking".into(), "radios".into(), "broken".into()]);
        config.navigation.insert(
            "dashboard".to_string(),
            BTreeMap::from([("radios".to_string(), 0.6), ("reports".to_string(), 0.1)]),
        );
        config.views.insert("radios".to_string(), vec!["radios".into()]);
        config.views.insert("reports".to_string(), vec!["reports".into()]);
        config
    }

    #[tokio::test]
    async fn test_login_warming_swallows_failures() {
        let (scheduler, cache, _, _) = setup(config());
        let report = scheduler.warm_on_login("admin").await;
        assert_eq!(report.attempted, 3);
        assert_eq!(report.warmed, 2);
        assert_eq!(report.failed, 1);
        assert!(cache.fresh(&CacheKey::new("songs-ranking")).is_some());

        assert_eq!(scheduler.warm_on_login("guest").await, WarmingReport::default());
    }

    #[tokio::test]
    async fn test_cooldown_skips_recent_warms() {
        let (scheduler, _, clock, fetcher) = setup(config());
        scheduler.warm_on_login("admin").await;
        let calls = fetcher.calls.load(Ordering::SeqCst);

        let again = scheduler.warm_on_login("admin").await;
        assert_eq!(again.skipped, 2);
        // Failed warms are not cooled down.
        assert_eq!(again.failed, 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), calls + 1);

        clock.advance(Duration::from_secs(6 * 60));
        let later = scheduler.warm_on_login("admin").await;
        assert_eq!(later.warmed, 2);
    }

    #[tokio::test]
    async fn test_navigation_respects_threshold() {
        let (scheduler, cache, _, _) = setup(config());
        assert_eq!(
            scheduler.predicted_views("dashboard"),
            vec![("radios".to_string(), 0.6)]
        );
        let report = scheduler.warm_on_navigation("dashboard").await;
        assert_eq!(report.warmed, 1);
        assert!(cache.fresh(&CacheKey::new("radios")).is_some());
        assert!(cache.fresh(&CacheKey::new("reports")).is_none());
    }

    #[tokio::test]
    async fn test_idle_warming_only_while_online() {
        let (scheduler, cache, _, _) = setup(config());
        cache.detector().set(Connectivity::Offline);
        assert_eq!(scheduler.warm_idle().await, WarmingReport::default());
        cache.detector().set(Connectivity::Online);
        let report = scheduler.warm_idle().await;
        assert_eq!(report.warmed, 1);
        assert!(cache.fresh(&CacheKey::new("genres")).is_some());
    }

    #[tokio::test]
    async fn test_adaptive_ranking() {
        let (scheduler, _, _, _) = setup(config());
        let dj = Principal::new("dj-1");
        for _ in 0..3 {
            scheduler.record_access(&dj, "radios");
        }
        scheduler.record_access(&dj, "genres");
        scheduler.record_access(&dj, "reports");
        assert_eq!(scheduler.frequent_keys(&dj, 2), vec!["radios", "genres"]);
        assert!(scheduler.frequent_keys(&Principal::new("other"), 5).is_empty());

        let report = scheduler.warm_adaptive(&dj, 2).await;
        assert_eq!(report.warmed, 2);
    }

    #[tokio::test]
    async fn test_signed_in_fetches_feed_adaptive_warming() {
        let (scheduler, cache, clock, _) = setup(config());
        let dj = Principal::new("dj-1");

        // Anonymous fetches are not attributed to anyone.
        cache.fetch_key("reports").await.unwrap();
        assert_eq!(cache.access_log().principal_count(), 0);

        cache.set_principal(Some(dj.clone()));
        for _ in 0..2 {
            cache.fetch_key("radios").await.unwrap();
        }
        cache.fetch_key("genres").await.unwrap();
        assert_eq!(scheduler.frequent_keys(&dj, 5), vec!["radios", "genres"]);

        // Warming is not user access.
        clock.advance(Duration::from_secs(3600));
        scheduler.warm_adaptive(&dj, 5).await;
        assert_eq!(scheduler.frequent_keys(&dj, 5), vec!["radios", "genres"]);
    }

    #[test]
    fn test_access_log_is_bounded() {
        let log = AccessLog::with_limits(2, 3);
        let (a, b, c) = (Principal::new("a"), Principal::new("b"), Principal::new("c"));
        log.record(&a, "x");
        log.record(&b, "x");
        log.record(&a, "y");
        // `b` is the least recently active.
        log.record(&c, "x");
        assert_eq!(log.principal_count(), 2);
        assert!(log.frequent(&b, 5).is_empty());
        assert_eq!(log.frequent(&a, 5), vec!["x", "y"]);

        for key in ["k1", "k1", "k2", "k3"] {
            log.record(&c, key);
        }
        assert_eq!(log.key_count(&c), 3);
        assert_eq!(log.frequent(&c, 1), vec!["k1"]);
    }

    #[tokio::test]
    async fn test_disabled_scheduler_skips_everything() {
        let mut disabled = config();
        disabled.enabled = false;
        let (scheduler, _, _, fetcher) = setup(disabled);
        let report = scheduler.warm_on_login("admin").await;
        assert_eq!(report.skipped, 3);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }
}
