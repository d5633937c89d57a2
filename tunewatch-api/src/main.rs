//! Tunewatch API Server Entry Point
//!
//! Loads configuration from the environment, wires the response cache and
//! invalidation orchestrator, and starts the Axum HTTP server.

use std::net::SocketAddr;

use axum::Router;
use tunewatch_api::telemetry::{init_tracing, TelemetryConfig};
use tunewatch_api::{create_api_router, ApiConfig, ApiError, ApiResult, AppState};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let api_config = ApiConfig::from_env()?;
    tracing::info!(
        cache_enabled = api_config.cache_enabled,
        routes = api_config.routes.rules().len(),
        debounce_ms = api_config.debounce_window.as_millis() as u64,
        "Cache configuration loaded"
    );

    let state = AppState::new(api_config);
    let orchestrator = state.orchestrator.clone();
    let app: Router = create_api_router(state);

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting Tunewatch API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    let flushed = orchestrator.flush_pending();
    if flushed.patterns > 0 {
        tracing::info!(patterns = flushed.patterns, "Flushed pending invalidations");
    }
    Ok(())
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("TUNEWATCH_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("TUNEWATCH_API_PORT").ok())
        .unwrap_or_else(|| "3000".to_string());
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
