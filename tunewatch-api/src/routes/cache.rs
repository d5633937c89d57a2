//! Cache Management Endpoints
//!
//! - `GET /api/cache/stats` - usage counters plus the route table
//! - `DELETE /api/cache/clear` - drop every entry and reset counters
//! - `DELETE /api/cache/invalidate/:pattern` - drop entries matching a regex
//!
//! Management calls go through the orchestrator, so every registered tier and
//! bus subscriber sees them, not only the local response cache.

use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tunewatch_core::{RouteCacheConfig, RouteRule, Timestamp};
use tunewatch_storage::{CacheStats, KeyPattern};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsResponse {
    pub cache: CacheStats,
    pub hit_rate_percent: String,
    pub enabled: bool,
    pub configs: Vec<RouteRule>,
    pub default_config: RouteCacheConfig,
    pub pending_invalidations: usize,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearResponse {
    pub message: String,
    pub removed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub message: String,
    pub pattern: String,
    pub count: usize,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /api/cache/stats
pub async fn stats(State(state): State<AppState>) -> Json<CacheStatsResponse> {
    let cache = state.cache.stats();
    Json(CacheStatsResponse {
        hit_rate_percent: cache.hit_rate_percent(),
        cache,
        enabled: state.config.cache_enabled,
        configs: state.routes.rules().to_vec(),
        default_config: state.routes.fallback(),
        pending_invalidations: state.orchestrator.pending_count(),
        timestamp: Utc::now(),
    })
}

/// DELETE /api/cache/clear
pub async fn clear(State(state): State<AppState>) -> Json<ClearResponse> {
    let report = state.orchestrator.invalidate_all(None);
    tracing::info!(removed = report.removed, "cache cleared");
    Json(ClearResponse {
        message: "Cache cleared successfully".to_string(),
        removed: report.removed,
    })
}

/// DELETE /api/cache/invalidate/:pattern
///
/// The path segment is percent-decoded and compiled as a regular expression
/// matched anywhere in the key.
pub async fn invalidate(
    State(state): State<AppState>,
    Path(pattern): Path<String>,
) -> ApiResult<Json<InvalidateResponse>> {
    if pattern.is_empty() {
        return Err(ApiError::invalid_pattern("Pattern must not be empty"));
    }
    let compiled = KeyPattern::regex(&pattern)?;
    let report = state.orchestrator.invalidate_patterns(&[compiled], None);
    tracing::info!(pattern = %pattern, removed = report.removed, "cache invalidated by pattern");
    Ok(Json(InvalidateResponse {
        message: format!("Invalidated {} cache entries", report.removed),
        pattern,
        count: report.removed,
    }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(stats))
        .route("/clear", delete(clear))
        .route("/invalidate/:pattern", delete(invalidate))
}
