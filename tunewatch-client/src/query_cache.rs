//! Offline-aware query cache.
//!
//! Wraps every tracked query's primary fetch:
//!
//! 1. A live result younger than the stale time is served without a call.
//! 2. While offline the query is queued for replay and the fallback record
//!    (or the caller's default) is served.
//! 3. Otherwise the primary fetch runs under the retry controller with the
//!    query's priority budget. Success refreshes the live tier and the
//!    fallback record.
//! 4. On failure the fallback record is served if it is within its hard TTL,
//!    marked stale once past the freshness window; then the default.
//! 5. With nothing to serve, the outcome carries the degradation behavior for
//!    the query's priority.
//!
//! Fallback data is always flagged as such in [`FallbackStatus`]. Fetch
//! errors never escape as errors; they turn into outcomes.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tunewatch_core::{CacheKey, Clock, FetchError, Principal, Priority, RetryError, Timestamp};
use tunewatch_storage::{InvalidationTarget, KeyPattern};

use crate::config::{ClientConfig, RetryConfig};
use crate::degradation::{DegradationPolicy, RecoveryBehavior};
use crate::error::{ClientError, ClientResult};
use crate::fallback::FallbackStore;
use crate::offline::{Connectivity, OfflineDetector, OfflineQueue, ReplayReport};
use crate::retry::RetryController;
use crate::warming::AccessLog;

// ============================================================================
// QUERIES
// ============================================================================

/// Primary data source for one query.
#[async_trait]
pub trait QueryFetcher: Send + Sync {
    async fn fetch(&self, key: &CacheKey) -> Result<Value, FetchError>;
}

#[derive(Clone)]
pub struct TrackedQuery {
    pub key: CacheKey,
    pub fetcher: Arc<dyn QueryFetcher>,
    /// Served when neither the network nor a fallback record can answer.
    pub default: Option<Value>,
    pub priority: Priority,
}

impl fmt::Debug for TrackedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedQuery")
            .field("key", &self.key)
            .field("priority", &self.priority)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

impl TrackedQuery {
    pub fn new(key: impl Into<CacheKey>, fetcher: Arc<dyn QueryFetcher>) -> Self {
        Self {
            key: key.into(),
            fetcher,
            default: None,
            priority: Priority::Secondary,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Fresh entry in the live tier.
    Live,
    Network,
    Fallback,
    /// The caller-supplied default.
    Default,
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FallbackStatus {
    pub is_using_fallback: bool,
    pub is_offline: bool,
    pub is_stale: bool,
    pub last_updated: Option<Timestamp>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub key: CacheKey,
    pub data: Option<Value>,
    pub status: FallbackStatus,
    pub source: DataSource,
    /// Set only when nothing could be served.
    pub degradation: Option<RecoveryBehavior>,
}

impl QueryOutcome {
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}

/// Shared flag telling a fetch whether its consumer still wants the result.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Default for Liveness {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abandon(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryCacheStatus {
    pub live_entries: usize,
    pub registered_queries: usize,
    pub fallback_served: u64,
    pub queued: usize,
    pub online: bool,
}

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct QueryCacheSettings {
    pub stale_time: Duration,
    pub retry: RetryConfig,
    pub replay_batch_size: usize,
    pub replay_pause: Duration,
}

impl Default for QueryCacheSettings {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(5 * 60),
            retry: RetryConfig::default(),
            replay_batch_size: 3,
            replay_pause: Duration::from_millis(500),
        }
    }
}

impl QueryCacheSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            stale_time: Duration::from_millis(config.cache.stale_time_ms),
            retry: config.retry.clone(),
            replay_batch_size: config.offline.replay_batch_size,
            replay_pause: Duration::from_millis(config.offline.replay_pause_ms),
        }
    }
}

// ============================================================================
// QUERY CACHE
// ============================================================================

#[derive(Debug, Clone)]
struct LiveEntry {
    data: Value,
    fetched_at: Timestamp,
}

struct Inner {
    live: DashMap<String, LiveEntry>,
    queries: DashMap<String, TrackedQuery>,
    fallback: FallbackStore,
    detector: OfflineDetector,
    queue: OfflineQueue,
    clock: Arc<dyn Clock>,
    settings: QueryCacheSettings,
    fallback_served: AtomicU64,
    principal: RwLock<Option<Principal>>,
    access: AccessLog,
}

#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("status", &self.status())
            .finish()
    }
}

impl QueryCache {
    pub fn new(settings: QueryCacheSettings, fallback: FallbackStore, detector: OfflineDetector) -> Self {
        let clock = fallback.clock().clone();
        Self {
            inner: Arc::new(Inner {
                live: DashMap::new(),
                queries: DashMap::new(),
                fallback,
                detector,
                queue: OfflineQueue::new(),
                clock,
                settings,
                fallback_served: AtomicU64::new(0),
                principal: RwLock::new(None),
                access: AccessLog::new(),
            }),
        }
    }

    pub fn detector(&self) -> &OfflineDetector {
        &self.inner.detector
    }

    pub fn fallback_store(&self) -> &FallbackStore {
        &self.inner.fallback
    }

    pub fn offline_queue(&self) -> &OfflineQueue {
        &self.inner.queue
    }

    pub fn is_online(&self) -> bool {
        self.inner.detector.is_online()
    }

    // ========================================================================
    // Session
    // ========================================================================

    /// Set the signed-in principal; `None` on sign-out.
    pub fn set_principal(&self, principal: Option<Principal>) {
        *self.inner.principal.write().unwrap_or_else(|e| e.into_inner()) = principal;
    }

    pub fn principal(&self) -> Option<Principal> {
        self.inner
            .principal
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn access_log(&self) -> &AccessLog {
        &self.inner.access
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Track a query so it can be fetched, warmed and replayed by key.
    pub fn register(&self, query: TrackedQuery) {
        self.inner.queries.insert(query.key.as_str().to_string(), query);
    }

    /// Stop tracking a query and drop its live entry. Its fallback record stays.
    pub fn unregister(&self, key: &str) -> Option<TrackedQuery> {
        self.inner.live.remove(key);
        self.inner.queries.remove(key).map(|(_, query)| query)
    }

    pub fn query(&self, key: &str) -> Option<TrackedQuery> {
        self.inner.queries.get(key).map(|q| q.value().clone())
    }

    /// Registered keys with the given priority, sorted.
    pub fn keys_with_priority(&self, priority: Priority) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .queries
            .iter()
            .filter(|q| q.priority == priority)
            .map(|q| q.key().clone())
            .collect();
        keys.sort();
        keys
    }

    // ========================================================================
    // Live tier
    // ========================================================================

    fn is_fresh_at(&self, entry: &LiveEntry, now: Timestamp) -> bool {
        let age = (now - entry.fetched_at).to_std().unwrap_or(Duration::ZERO);
        age <= self.inner.settings.stale_time
    }

    /// Live data younger than the stale time. A stale entry is dropped on sight.
    pub fn fresh(&self, key: &CacheKey) -> Option<Value> {
        let now = self.inner.clock.now();
        {
            let entry = self.inner.live.get(key.as_str())?;
            if self.is_fresh_at(&entry, now) {
                return Some(entry.data.clone());
            }
        }
        self.inner
            .live
            .remove_if(key.as_str(), |_, entry| !self.is_fresh_at(entry, now));
        None
    }

    /// Drop every live entry past the stale time. Returns how many went.
    pub fn evict_stale(&self) -> usize {
        let now = self.inner.clock.now();
        let before = self.inner.live.len();
        self.inner.live.retain(|_, entry| self.is_fresh_at(entry, now));
        let removed = before.saturating_sub(self.inner.live.len());
        if removed > 0 {
            tracing::debug!(removed, "evicted stale live entries");
        }
        removed
    }

    /// Run [`evict_stale`](Self::evict_stale) every `interval` until aborted.
    pub fn spawn_stale_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.evict_stale();
            }
        })
    }

    // ========================================================================
    // Fetching
    // ========================================================================

    /// Fetch a registered query by key.
    pub async fn fetch_key(&self, key: &str) -> ClientResult<QueryOutcome> {
        let query = self.query(key).ok_or_else(|| ClientError::UnknownQuery {
            key: key.to_string(),
        })?;
        Ok(self.fetch(&query).await)
    }

    pub async fn fetch(&self, query: &TrackedQuery) -> QueryOutcome {
        let controller = self.controller_for(query.priority);
        match self.fetch_controlled(query, &controller).await {
            Ok(outcome) => outcome,
            // Only reachable through cancel(), which nobody else holds.
            Err(_) => self.degrade(query, "cancelled".to_string(), false).await,
        }
    }

    /// Like [`fetch`](Self::fetch), but withheld once `liveness` is abandoned.
    ///
    /// The caches are still updated when a late result arrives.
    pub async fn fetch_with_liveness(
        &self,
        query: &TrackedQuery,
        liveness: &Liveness,
    ) -> Result<QueryOutcome, FetchError> {
        if !liveness.is_alive() {
            return Err(FetchError::Abandoned);
        }
        let outcome = self.fetch(query).await;
        if !liveness.is_alive() {
            tracing::debug!(key = %query.key, "consumer abandoned, result dropped");
            return Err(FetchError::Abandoned);
        }
        Ok(outcome)
    }

    /// A retry controller with the query's budget, suppressed while offline.
    pub fn controller_for(&self, priority: Priority) -> RetryController {
        RetryController::new(self.inner.settings.retry.for_priority(priority))
            .with_connectivity(self.inner.detector.subscribe())
    }

    /// Fetch under a caller-held controller, so the caller can retry now or cancel.
    ///
    /// Cancellation surfaces as [`FetchError::Abandoned`].
    pub async fn fetch_controlled(
        &self,
        query: &TrackedQuery,
        controller: &RetryController,
    ) -> Result<QueryOutcome, FetchError> {
        if let Some(principal) = self.principal() {
            self.inner.access.record(&principal, query.key.as_str());
        }
        if let Some(data) = self.fresh(&query.key) {
            tracing::debug!(key = %query.key, "live cache hit");
            return Ok(QueryOutcome {
                key: query.key.clone(),
                data: Some(data),
                status: FallbackStatus::default(),
                source: DataSource::Live,
                degradation: None,
            });
        }

        if !self.is_online() {
            self.inner.queue.enqueue(query.key.clone());
            return Ok(self.degrade(query, "offline".to_string(), true).await);
        }

        match self.refresh_with(query, controller).await {
            Ok(data) => Ok(QueryOutcome {
                key: query.key.clone(),
                data: Some(data),
                status: FallbackStatus {
                    last_updated: Some(self.inner.clock.now()),
                    ..FallbackStatus::default()
                },
                source: DataSource::Network,
                degradation: None,
            }),
            Err(RetryError::Cancelled) => Err(FetchError::Abandoned),
            Err(RetryError::OfflineDetected) => {
                self.inner.detector.set(Connectivity::Offline);
                self.inner.queue.enqueue(query.key.clone());
                Ok(self.degrade(query, "offline".to_string(), true).await)
            }
            Err(err) => {
                tracing::debug!(key = %query.key, error = %err, "primary fetch failed");
                Ok(self.degrade(query, err.to_string(), false).await)
            }
        }
    }

    /// Run the primary fetch and, on success, refresh both tiers.
    async fn refresh_with(
        &self,
        query: &TrackedQuery,
        controller: &RetryController,
    ) -> Result<Value, RetryError> {
        let fetcher = query.fetcher.clone();
        let key = &query.key;
        let data = controller.run(|_| fetcher.fetch(key)).await?;
        self.store_success(key, data.clone()).await;
        Ok(data)
    }

    async fn store_success(&self, key: &CacheKey, data: Value) {
        self.inner.live.insert(
            key.as_str().to_string(),
            LiveEntry {
                data: data.clone(),
                fetched_at: self.inner.clock.now(),
            },
        );
        if let Err(err) = self.inner.fallback.put(key, data).await {
            tracing::warn!(key = %key, error = %err, "failed to persist fallback record");
        }
    }

    /// Serve the fallback record, then the default, then a degradation decision.
    async fn degrade(&self, query: &TrackedQuery, reason: String, offline: bool) -> QueryOutcome {
        let lookup = match self.inner.fallback.get(&query.key).await {
            Ok(lookup) => lookup,
            Err(err) => {
                tracing::warn!(key = %query.key, error = %err, "fallback lookup failed");
                None
            }
        };

        if let Some(lookup) = lookup {
            self.inner.fallback_served.fetch_add(1, Ordering::Relaxed);
            tracing::info!(key = %query.key, stale = lookup.stale, reason = %reason, "serving fallback data");
            return QueryOutcome {
                key: query.key.clone(),
                data: Some(lookup.record.data),
                status: FallbackStatus {
                    is_using_fallback: true,
                    is_offline: offline,
                    is_stale: lookup.stale,
                    last_updated: Some(lookup.record.stored_at),
                    fallback_reason: Some(reason),
                },
                source: DataSource::Fallback,
                degradation: None,
            };
        }

        if let Some(default) = &query.default {
            self.inner.fallback_served.fetch_add(1, Ordering::Relaxed);
            return QueryOutcome {
                key: query.key.clone(),
                data: Some(default.clone()),
                status: FallbackStatus {
                    is_using_fallback: true,
                    is_offline: offline,
                    is_stale: false,
                    last_updated: None,
                    fallback_reason: Some(reason),
                },
                source: DataSource::Default,
                degradation: None,
            };
        }

        let behavior = DegradationPolicy::for_priority(query.priority).on_exhaustion;
        tracing::warn!(
            key = %query.key,
            priority = %query.priority,
            behavior = ?behavior,
            reason = %reason,
            "no data available, degrading"
        );
        QueryOutcome {
            key: query.key.clone(),
            data: None,
            status: FallbackStatus {
                is_using_fallback: false,
                is_offline: offline,
                is_stale: false,
                last_updated: None,
                fallback_reason: Some(reason),
            },
            source: DataSource::None,
            degradation: Some(behavior),
        }
    }

    /// Refresh a registered query in the background.
    ///
    /// Returns `Ok(false)` when live data is still fresh or the client is
    /// offline, and does not touch fallback serving.
    pub async fn prefetch(&self, key: &str) -> ClientResult<bool> {
        let query = self.query(key).ok_or_else(|| ClientError::UnknownQuery {
            key: key.to_string(),
        })?;
        if self.fresh(&query.key).is_some() || !self.is_online() {
            return Ok(false);
        }
        let controller = self.controller_for(query.priority);
        self.refresh_with(&query, &controller).await?;
        Ok(true)
    }

    // ========================================================================
    // Offline replay
    // ========================================================================

    /// Refetch everything queued while offline. Unregistered keys are dropped.
    pub async fn replay_offline(&self) -> ReplayReport {
        let settings = &self.inner.settings;
        self.inner
            .queue
            .replay(settings.replay_batch_size, settings.replay_pause, move |key| async move {
                let Some(query) = self.query(key.as_str()) else {
                    return Err(FetchError::InvalidResponse {
                        reason: format!("query {} is not registered", key),
                    });
                };
                let controller = self.controller_for(query.priority);
                match self.refresh_with(&query, &controller).await {
                    Ok(_) => Ok(()),
                    Err(RetryError::OfflineDetected) => Err(FetchError::Offline),
                    Err(err) => Err(err
                        .last_failure()
                        .cloned()
                        .unwrap_or(FetchError::Abandoned)),
                }
            })
            .await
    }

    /// Replay the offline queue every time connectivity comes back.
    pub fn spawn_reconnect_replayer(&self) -> JoinHandle<()> {
        let cache = self.clone();
        let mut connectivity = self.inner.detector.subscribe();
        tokio::spawn(async move {
            while connectivity.changed().await.is_ok() {
                if *connectivity.borrow_and_update() != Connectivity::Online {
                    continue;
                }
                let report = cache.replay_offline().await;
                if report.replayed > 0 {
                    tracing::info!(
                        replayed = report.replayed,
                        succeeded = report.succeeded,
                        requeued = report.requeued,
                        "offline queue replayed"
                    );
                }
            }
        })
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn status(&self) -> QueryCacheStatus {
        QueryCacheStatus {
            live_entries: self.inner.live.len(),
            registered_queries: self.inner.queries.len(),
            fallback_served: self.inner.fallback_served.load(Ordering::Relaxed),
            queued: self.inner.queue.len(),
            online: self.is_online(),
        }
    }
}

/// Invalidation only drops live entries; fallback records stay as last-known-good.
impl InvalidationTarget for QueryCache {
    fn name(&self) -> &str {
        "query-cache"
    }

    fn invalidate(&self, pattern: &KeyPattern) -> usize {
        let before = self.inner.live.len();
        self.inner.live.retain(|key, _| !pattern.matches(key));
        before.saturating_sub(self.inner.live.len())
    }

    fn invalidate_all(&self) -> usize {
        let removed = self.inner.live.len();
        self.inner.live.clear();
        removed
    }
}
