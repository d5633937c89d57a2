//! Tunewatch API - Response Cache and Invalidation Layer
//!
//! HTTP front of the radio monitoring dashboard. Cache-enabled reads are
//! answered from a per-route TTL store keyed by request fingerprint; writes
//! acknowledged with a 2xx purge the cached reads they affect. Cache
//! management and health endpoints sit beside the data routes.

pub mod macros;

pub mod config;
pub mod data;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::ApiConfig;
pub use data::{Radio, RadioUpdate, StationData};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use middleware::{CacheStatus, CachedResponse, X_CACHE, X_CACHE_INVALIDATED, X_CACHE_KEY, X_SKIP_CACHE};
pub use routes::create_api_router;
pub use state::{AppState, ResponseCache};
