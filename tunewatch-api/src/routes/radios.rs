//! Radio Station Endpoints
//!
//! - `GET /api/radios` - list monitored stations
//! - `GET /api/radios/:id` - one station
//! - `PUT /api/radios/:id` - update name or online flag

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use crate::data::{Radio, RadioUpdate, StationData};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// GET /api/radios
pub async fn list(State(data): State<Arc<StationData>>) -> Json<Vec<Radio>> {
    Json(data.radios())
}

/// GET /api/radios/:id
pub async fn get_radio(
    State(data): State<Arc<StationData>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Radio>> {
    data.radio(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Radio {} not found", id)))
}

/// PUT /api/radios/:id
pub async fn update_radio(
    State(data): State<Arc<StationData>>,
    Path(id): Path<String>,
    Json(update): Json<RadioUpdate>,
) -> ApiResult<Json<Radio>> {
    data.update_radio(&id, update)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Radio {} not found", id)))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/api/radios", get(list))
        .route("/api/radios/:id", get(get_radio).put(update_radio))
}
