//! Tunewatch Client - Resilience Tier
//!
//! Everything between the dashboard UI and the Tunewatch API: an offline-aware
//! query cache that serves last-known-good fallback records when the network
//! or backend fails, a retry/backoff controller, priority-tiered degradation
//! with per-section loading state, and a cache warming scheduler.
//!
//! [`ClientRuntime`] wires the pieces together from a [`ClientConfig`].

pub mod api_client;
pub mod config;
pub mod degradation;
pub mod error;
pub mod fallback;
pub mod offline;
pub mod query_cache;
pub mod retry;
pub mod warming;

pub use api_client::{ApiClient, EndpointFetcher};
pub use config::{ClientConfig, ConfigError as ClientConfigError};
pub use degradation::{
    DegradationPolicy, RecoveryBehavior, SectionBoard, SectionLoadingState, SectionView,
};
pub use error::{ClientError, ClientResult};
pub use fallback::{FallbackLookup, FallbackRecord, FallbackStore};
pub use offline::{Connectivity, OfflineDetector, OfflineQueue, ReplayReport};
pub use query_cache::{
    DataSource, FallbackStatus, Liveness, QueryCache, QueryCacheSettings, QueryCacheStatus,
    QueryFetcher, QueryOutcome, TrackedQuery,
};
pub use retry::{RetryController, RetryPhase, RetryPolicy, RetryState};
pub use warming::{AccessLog, WarmingReport, WarmingScheduler};

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tunewatch_core::{Clock, FetchError, Principal, SystemClock};
use tunewatch_storage::{
    InMemoryKeyValueStore, InvalidationBus, InvalidationOrchestrator, InvalidationReport,
    JsonFileKeyValueStore, KeyPattern, KeyValueStore, OrchestratorConfig, WriteAck,
};

/// Result of an acknowledged write.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub status: u16,
    pub body: Value,
    pub invalidated: InvalidationReport,
}

/// A fully wired client tier.
#[derive(Debug, Clone)]
pub struct ClientRuntime {
    pub config: Arc<ClientConfig>,
    pub api: ApiClient,
    pub detector: OfflineDetector,
    pub cache: QueryCache,
    pub warming: WarmingScheduler,
    /// Client-side invalidation; the query cache is registered as a target.
    pub orchestrator: InvalidationOrchestrator,
}

impl ClientRuntime {
    pub fn from_config(config: ClientConfig) -> ClientResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: ClientConfig, clock: Arc<dyn Clock>) -> ClientResult<Self> {
        config.validate()?;
        let api = ApiClient::new(config.base_url.clone(), config.request_timeout())?;

        let kv: Arc<dyn KeyValueStore> = match &config.fallback.path {
            Some(path) => Arc::new(JsonFileKeyValueStore::new(path.clone())),
            None => Arc::new(InMemoryKeyValueStore::new()),
        };
        let fallback = FallbackStore::new(
            kv,
            clock.clone(),
            Duration::from_millis(config.fallback.hard_ttl_ms),
            Duration::from_millis(config.fallback.freshness_ms),
        );

        let detector = OfflineDetector::default();
        let cache = QueryCache::new(QueryCacheSettings::from_config(&config), fallback, detector.clone());
        let warming = WarmingScheduler::new(cache.clone(), config.warming.clone(), clock);

        let orchestrator = InvalidationOrchestrator::new(OrchestratorConfig::default(), InvalidationBus::new());
        orchestrator.register_target(Arc::new(cache.clone()));

        tracing::info!(base_url = %config.base_url, "client runtime ready");
        Ok(Self {
            config: Arc::new(config),
            api,
            detector,
            cache,
            warming,
            orchestrator,
        })
    }

    /// Track a GET endpoint under `key`.
    pub fn track(&self, key: &str, path: &str, priority: tunewatch_core::Priority) -> TrackedQuery {
        let query = TrackedQuery::new(key, Arc::new(self.api.endpoint(path))).with_priority(priority);
        self.cache.register(query.clone());
        query
    }

    /// Attribute later fetches to `principal` for adaptive warming.
    pub fn sign_in(&self, principal: Principal) {
        self.cache.set_principal(Some(principal));
    }

    pub fn sign_out(&self) {
        self.cache.set_principal(None);
    }

    /// Send a write, then invalidate `invalidates` plus the aggregate views.
    ///
    /// Nothing is invalidated unless the server acknowledged the write.
    pub async fn mutate(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &Value,
        invalidates: &[KeyPattern],
    ) -> ClientResult<Mutation> {
        let verb = method.as_str().to_string();
        self.mutate_with(&verb, self.api.send_json(method, path, body), invalidates)
            .await
    }

    /// [`mutate`](Self::mutate) over any transport.
    pub async fn mutate_with<Fut>(
        &self,
        method: &str,
        write: Fut,
        invalidates: &[KeyPattern],
    ) -> ClientResult<Mutation>
    where
        Fut: Future<Output = Result<(u16, Value), FetchError>>,
    {
        let (status, body) = write.await?;
        let ack = WriteAck::from_response(method, status, self.cache.principal()).ok_or_else(|| {
            FetchError::InvalidResponse {
                reason: format!("write answered with status {}", status),
            }
        })?;
        let invalidated = self.orchestrator.on_write_acknowledged(&ack, invalidates);
        tracing::debug!(method, status, removed = invalidated.removed, "write acknowledged");
        Ok(Mutation {
            status,
            body,
            invalidated,
        })
    }

    /// Start the connectivity probe, reconnect replay, stale sweep and idle
    /// warming tasks.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let offline = &self.config.offline;
        let mut handles = vec![
            self.detector.spawn_probe_loop(
                self.api.clone(),
                offline.probe_path.clone(),
                Duration::from_millis(offline.probe_interval_ms),
                Duration::from_millis(offline.probe_timeout_ms),
            ),
            self.cache.spawn_reconnect_replayer(),
            self.cache
                .spawn_stale_sweeper(Duration::from_millis(self.config.cache.stale_time_ms.max(1_000))),
        ];
        if self.config.warming.enabled {
            handles.push(self.warming.spawn_idle_loop());
        }
        handles
    }
}
