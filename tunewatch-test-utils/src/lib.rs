//! Tunewatch Test Utilities
//!
//! Shared test infrastructure for the Tunewatch workspace:
//! - Scripted fetchers standing in for the remote data services
//! - Proptest generators for keys, principals, queries and retry policies
//! - Fixtures with sample dashboard payloads and client wiring
//! - Assertions for query outcomes

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// Re-export the types tests reach for most
pub use tunewatch_client::{
    DataSource, FallbackStatus, QueryCache, QueryFetcher, QueryOutcome, RecoveryBehavior,
    TrackedQuery,
};
pub use tunewatch_core::{CacheKey, FetchError, ManualClock, Principal, Priority, QueryParams};
pub use tunewatch_storage::{InMemoryKeyValueStore, KeyPattern};

// ============================================================================
// MOCK FETCHERS
// ============================================================================

/// Replays a script of results, one per call.
///
/// Once the script runs out the last result repeats. An optional latency is
/// applied before every answer (use a paused tokio clock to keep tests fast).
#[derive(Debug)]
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Result<Value, FetchError>>>,
    last: Mutex<Option<Result<Value, FetchError>>>,
    latency: Option<Duration>,
    calls: AtomicU32,
}

impl ScriptedFetcher {
    pub fn new(script: impl IntoIterator<Item = Result<Value, FetchError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
            latency: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Always succeeds with `value`.
    pub fn ok(value: Value) -> Self {
        Self::new([Ok(value)])
    }

    /// Always fails with `error`.
    pub fn failing(error: FetchError) -> Self {
        Self::new([Err(error)])
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Append results to the script.
    pub fn push(&self, result: Result<Value, FetchError>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_result(&self) -> Result<Value, FetchError> {
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match next {
            Some(result) => {
                *last = Some(result.clone());
                result
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(FetchError::network("script exhausted"))),
        }
    }
}

#[async_trait]
impl QueryFetcher for ScriptedFetcher {
    async fn fetch(&self, _key: &CacheKey) -> Result<Value, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.next_result()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Tunewatch types.

    use super::*;
    use proptest::prelude::*;
    use tunewatch_client::RetryPolicy;

    /// An authenticated principal id.
    pub fn arb_principal() -> impl Strategy<Value = Principal> {
        "[a-z0-9_@.-]{1,16}".prop_map(Principal::new)
    }

    pub fn arb_optional_principal() -> impl Strategy<Value = Option<Principal>> {
        proptest::option::of(arb_principal())
    }

    /// API paths below the cached prefixes.
    pub fn arb_api_path() -> impl Strategy<Value = String> {
        (
            prop_oneof![
                Just("/api/dashboard"),
                Just("/api/dashboard-batch/batch"),
                Just("/api/radios"),
                Just("/api/streams"),
            ],
            proptest::option::of("[a-z0-9]{1,6}"),
        )
            .prop_map(|(base, tail)| match tail {
                Some(tail) => format!("{}/{}", base, tail),
                None => base.to_string(),
            })
    }

    /// Query pairs, possibly with repeated names and URL-hostile characters.
    pub fn arb_query_pairs() -> impl Strategy<Value = Vec<(String, String)>> {
        proptest::collection::vec(
            (
                prop_oneof![Just("period"), Just("radio"), Just("genre"), Just("page")],
                "[a-zA-Z0-9 :&=%]{0,8}",
            )
                .prop_map(|(name, value)| (name.to_string(), value)),
            0..6,
        )
    }

    pub fn arb_priority() -> impl Strategy<Value = Priority> {
        prop_oneof![
            Just(Priority::Essential),
            Just(Priority::Secondary),
            Just(Priority::Optional),
        ]
    }

    pub fn arb_fetch_error() -> impl Strategy<Value = FetchError> {
        prop_oneof![
            "[a-z ]{1,12}".prop_map(FetchError::network),
            (1u64..60_000).prop_map(|timeout_ms| FetchError::Timeout { timeout_ms }),
            (400u16..600).prop_map(|status| FetchError::status(status, "upstream")),
            Just(FetchError::Offline),
        ]
    }

    /// Valid retry policies.
    pub fn arb_retry_policy() -> impl Strategy<Value = RetryPolicy> {
        (0u32..6, 1u64..5_000, 1.0f64..4.0, 0u64..60_000).prop_map(
            |(max_retries, base_delay_ms, backoff_multiplier, extra)| {
                RetryPolicy::new(
                    max_retries,
                    base_delay_ms,
                    backoff_multiplier,
                    base_delay_ms + extra,
                )
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Sample payloads and pre-wired client components.

    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tunewatch_client::config::{RetryConfig, WarmingConfig};
    use tunewatch_client::{FallbackStore, OfflineDetector, QueryCacheSettings};
    use tunewatch_core::Clock;

    /// Songs ranking as the essential dashboard section returns it.
    pub fn songs_ranking() -> Value {
        json!({
            "songs": [
                {"position": 1, "title": "Evidências", "artist": "Chitãozinho & Xororó", "plays": 41},
                {"position": 2, "title": "Garota de Ipanema", "artist": "Tom Jobim", "plays": 37},
                {"position": 3, "title": "Ai Se Eu Te Pego", "artist": "Michel Teló", "plays": 29},
            ],
            "period": "7d",
        })
    }

    pub fn genre_distribution() -> Value {
        json!({"sertanejo": 0.42, "pop": 0.31, "mpb": 0.27})
    }

    /// dashboard -> radios (0.6), reports (0.1); radios -> dashboard (0.8).
    pub fn navigation_table() -> BTreeMap<String, BTreeMap<String, f64>> {
        BTreeMap::from([
            (
                "dashboard".to_string(),
                BTreeMap::from([("radios".to_string(), 0.6), ("reports".to_string(), 0.1)]),
            ),
            (
                "radios".to_string(),
                BTreeMap::from([("dashboard".to_string(), 0.8)]),
            ),
        ])
    }

    pub fn warming_config() -> WarmingConfig {
        WarmingConfig {
            navigation: navigation_table(),
            starter_sets: BTreeMap::from([(
                "admin".to_string(),
                vec!["songs-ranking".to_string(), "radios".to_string()],
            )]),
            views: BTreeMap::from([
                ("dashboard".to_string(), vec!["songs-ranking".to_string()]),
                ("radios".to_string(), vec!["radios".to_string()]),
                ("reports".to_string(), vec!["reports".to_string()]),
            ]),
            ..WarmingConfig::default()
        }
    }

    /// An in-memory query cache on a manual clock, with default budgets.
    pub fn query_cache(clock: &ManualClock) -> QueryCache {
        query_cache_with_retry(clock, RetryConfig::default())
    }

    pub fn query_cache_with_retry(clock: &ManualClock, retry: RetryConfig) -> QueryCache {
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let fallback = FallbackStore::new(
            Arc::new(InMemoryKeyValueStore::new()),
            shared,
            Duration::from_secs(24 * 60 * 60),
            Duration::from_secs(30 * 60),
        );
        let settings = QueryCacheSettings {
            retry,
            ..QueryCacheSettings::default()
        };
        QueryCache::new(settings, fallback, OfflineDetector::default())
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on query outcomes.

    use super::*;

    /// Assert fresh network or live data.
    #[track_caller]
    pub fn assert_fresh(outcome: &QueryOutcome) {
        assert!(
            matches!(outcome.source, DataSource::Network | DataSource::Live),
            "Expected fresh data, got: {:?}",
            outcome
        );
        assert!(!outcome.status.is_using_fallback, "Fresh data flagged as fallback");
    }

    /// Assert the outcome came from a fallback record and says so.
    #[track_caller]
    pub fn assert_fallback(outcome: &QueryOutcome, stale: bool) {
        assert_eq!(outcome.source, DataSource::Fallback, "Expected fallback: {:?}", outcome);
        assert!(outcome.status.is_using_fallback, "Fallback not flagged");
        assert_eq!(outcome.status.is_stale, stale, "Wrong staleness: {:?}", outcome.status);
        assert!(outcome.status.fallback_reason.is_some(), "Missing fallback reason");
    }

    /// Assert nothing was served and the given behavior applies.
    #[track_caller]
    pub fn assert_degraded(outcome: &QueryOutcome, behavior: RecoveryBehavior) {
        assert!(outcome.data.is_none(), "Expected no data, got: {:?}", outcome.data);
        assert_eq!(outcome.degradation, Some(behavior));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_script_replays_then_repeats_last() {
        let fetcher = ScriptedFetcher::new([
            Err(FetchError::status(503, "busy")),
            Ok(json!(1)),
        ]);
        let key = CacheKey::new("k");
        assert!(fetcher.fetch(&key).await.is_err());
        assert_eq!(fetcher.fetch(&key).await, Ok(json!(1)));
        assert_eq!(fetcher.fetch(&key).await, Ok(json!(1)));
        fetcher.push(Err(FetchError::Offline));
        assert_eq!(fetcher.fetch(&key).await, Err(FetchError::Offline));
        assert_eq!(fetcher.calls(), 4);
    }

    #[tokio::test]
    async fn test_empty_script_fails() {
        let fetcher = ScriptedFetcher::new([]);
        assert!(fetcher.fetch(&CacheKey::new("k")).await.is_err());
    }
}
