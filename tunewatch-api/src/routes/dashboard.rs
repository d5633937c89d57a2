//! Dashboard Endpoints
//!
//! Read side of the monitoring dashboard, split by section priority, plus the
//! batch read and the play-ingest write that feeds it.
//!
//! - `GET /api/dashboard` - every section plus the viewer
//! - `GET /api/dashboard/:section` - one section (`essential`, `secondary`, `optional`)
//! - `PUT /api/dashboard/:section` - replace a section payload
//! - `POST /api/dashboard-batch/batch` - several sections in one read
//! - `POST /api/plays` - record a detected play

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tunewatch_core::{Principal, Priority, ANONYMOUS_PRINCIPAL};

use crate::data::StationData;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub viewer: String,
    pub essential: Value,
    pub secondary: Value,
    pub optional: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub sections: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayRecorded {
    pub plays_total: u64,
}

fn parse_section(raw: &str) -> ApiResult<Priority> {
    raw.parse()
        .map_err(|_| ApiError::not_found(format!("Unknown dashboard section: {}", raw)))
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /api/dashboard
pub async fn summary(
    State(data): State<Arc<StationData>>,
    principal: Option<Extension<Principal>>,
) -> Json<DashboardSummary> {
    let viewer = principal
        .map(|Extension(p)| p.as_str().to_string())
        .unwrap_or_else(|| ANONYMOUS_PRINCIPAL.to_string());
    Json(DashboardSummary {
        viewer,
        essential: data.section(Priority::Essential),
        secondary: data.section(Priority::Secondary),
        optional: data.section(Priority::Optional),
    })
}

/// GET /api/dashboard/:section
pub async fn section(
    State(data): State<Arc<StationData>>,
    Path(section): Path<String>,
) -> ApiResult<Json<Value>> {
    let priority = parse_section(&section)?;
    Ok(Json(data.section(priority)))
}

/// PUT /api/dashboard/:section
pub async fn replace_section(
    State(data): State<Arc<StationData>>,
    Path(section): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<Value>> {
    let priority = parse_section(&section)?;
    if !payload.is_object() {
        return Err(ApiError::invalid_input("Section payload must be a JSON object"));
    }
    data.replace_section(priority, payload);
    Ok(Json(data.section(priority)))
}

/// POST /api/dashboard-batch/batch
pub async fn batch(
    State(data): State<Arc<StationData>>,
    Json(request): Json<BatchRequest>,
) -> ApiResult<Json<BatchResponse>> {
    let mut results = Map::new();
    for name in &request.sections {
        let priority = parse_section(name)?;
        results.insert(name.clone(), data.section(priority));
    }
    Ok(Json(BatchResponse { results }))
}

/// POST /api/plays
pub async fn record_play(State(data): State<Arc<StationData>>) -> Json<PlayRecorded> {
    Json(PlayRecorded {
        plays_total: data.record_play(),
    })
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/api/dashboard", get(summary))
        .route("/api/dashboard/:section", get(section).put(replace_section))
        .route("/api/plays", post(record_play))
}

/// POST routes that only read. Mounted outside write invalidation.
pub fn create_read_router() -> Router<AppState> {
    Router::new().route("/api/dashboard-batch/batch", post(batch))
}
