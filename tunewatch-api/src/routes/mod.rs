//! REST API Routes
//!
//! Assembles the data routes behind the cache and invalidation middleware,
//! and mounts the cache management and health endpoints beside them.

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    Router,
};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tunewatch_storage::KeyPattern;

use crate::config::ApiConfig;
use crate::middleware::{
    invalidation_middleware, principal_middleware, response_cache_middleware, InvalidationState,
    TrustedPrincipalHeader, X_CACHE, X_CACHE_INVALIDATED, X_CACHE_KEY,
};
use crate::state::AppState;
use crate::telemetry::observability_middleware;

pub mod cache;
pub mod dashboard;
pub mod health;
pub mod radios;

/// Build the full application router.
///
/// Request flow for data routes: identity, then the response cache (which may
/// answer on its own), then write invalidation, then the handler. Read-only
/// POST routes skip write invalidation.
pub fn create_api_router(state: AppState) -> Router {
    let orchestrator = state.orchestrator.clone();

    let radios = radios::create_router().route_layer(from_fn_with_state(
        InvalidationState::explicit(orchestrator.clone(), vec![KeyPattern::path_prefix("/api/radios")])
            .debounced(),
        invalidation_middleware,
    ));

    let data = Router::new()
        .merge(dashboard::create_router())
        .merge(radios)
        .layer(from_fn_with_state(
            InvalidationState::auto(orchestrator),
            invalidation_middleware,
        ))
        .merge(dashboard::create_read_router())
        .layer(from_fn_with_state(state.clone(), response_cache_middleware))
        .layer(from_fn_with_state(
            TrustedPrincipalHeader(state.config.trusted_principal_header.clone()),
            principal_middleware,
        ));

    let cors = build_cors_layer(&state.config);

    Router::new()
        .nest("/health", health::create_router())
        .nest("/api/cache", cache::create_router())
        .merge(data)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(observability_middleware))
        .layer(cors)
}

// ============================================================================
// CORS LAYER
// ============================================================================

/// Build the CORS layer from ApiConfig.
///
/// In development mode (empty origins), allows all origins.
/// In production mode, only allows configured origins.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("x-skip-cache"),
        ])
        .expose_headers([X_CACHE, X_CACHE_KEY, X_CACHE_INVALIDATED])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "ignoring unparseable CORS origin");
                    None
                }
            })
            .collect();
        cors.allow_origin(origins)
    }
}
