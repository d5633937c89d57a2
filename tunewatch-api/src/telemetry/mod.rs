//! Tunewatch Telemetry - Logging Infrastructure
//!
//! Structured request logging and tracing-subscriber setup for the API layer.

pub mod middleware;
pub mod tracer;

pub use middleware::observability_middleware;
pub use tracer::{init_tracing, LogFormat, TelemetryConfig};
