//! Shared application state for Axum routers.

use std::sync::Arc;

use tunewatch_core::RouteTable;
use tunewatch_storage::{
    InvalidationBus, InvalidationOrchestrator, OrchestratorConfig, TtlCacheStore,
};

use crate::config::ApiConfig;
use crate::data::StationData;
use crate::middleware::CachedResponse;

/// Server-side response cache.
pub type ResponseCache = TtlCacheStore<CachedResponse>;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Fingerprinted responses for cache-enabled routes.
    pub cache: ResponseCache,
    /// Per-route TTL table, resolved once per request.
    pub routes: Arc<RouteTable>,
    /// Purges stale reads after acknowledged writes.
    ///
    /// The response cache is registered as a target at construction, so every
    /// pass run through here reaches it.
    pub orchestrator: InvalidationOrchestrator,
    pub config: Arc<ApiConfig>,
    pub data: Arc<StationData>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: ApiConfig) -> Self {
        Self::with_data(config, StationData::sample())
    }

    pub fn with_data(config: ApiConfig, data: StationData) -> Self {
        let cache = ResponseCache::new();
        let orchestrator = InvalidationOrchestrator::new(
            OrchestratorConfig::default()
                .with_debounce_window(config.debounce_window)
                .with_auto_patterns(config.auto_invalidate_patterns()),
            InvalidationBus::new(),
        );
        orchestrator.register_target(Arc::new(cache.clone()));

        Self {
            cache,
            routes: Arc::new(config.routes.clone()),
            orchestrator,
            config: Arc::new(config),
            data: Arc::new(data),
            start_time: std::time::Instant::now(),
        }
    }
}

crate::impl_from_ref!(ResponseCache, cache);
crate::impl_from_ref!(Arc<RouteTable>, routes);
crate::impl_from_ref!(InvalidationOrchestrator, orchestrator);
crate::impl_from_ref!(Arc<ApiConfig>, config);
crate::impl_from_ref!(Arc<StationData>, data);
crate::impl_from_ref!(std::time::Instant, start_time);
