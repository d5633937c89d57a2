//! Axum Middleware for HTTP Request Logging
//!
//! Wraps every request in a span keyed by a normalized route and logs the
//! outcome, including whether the response cache answered it.

use axum::{extract::Request, middleware::Next, response::Response};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Instant;
use tracing::{info_span, Instrument};

use crate::middleware::{X_CACHE, X_CACHE_INVALIDATED};

static UUID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .expect("Invalid UUID regex")
});

static ID_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").expect("Invalid ID regex"));

/// Normalize path for spans (replace UUIDs and numeric IDs with placeholders).
fn normalize_path(path: &str) -> String {
    let result = UUID_PATTERN.replace_all(path, "{id}");
    let result = ID_PATTERN.replace_all(&result, "/{id}$1");
    result.to_string()
}

/// Request logging middleware for Axum.
pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let normalized_path = normalize_path(&path);

    let span = info_span!(
        "http_request",
        http.method = %method,
        http.target = %path,
        http.route = %normalized_path,
    );

    let response = next.run(request).instrument(span).await;

    let status = response.status();
    let cache = response
        .headers()
        .get(X_CACHE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    let invalidated = response
        .headers()
        .get(X_CACHE_INVALIDATED)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    tracing::info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        cache,
        invalidated,
        duration_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/api/radios/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/api/radios/{id}");
    }

    #[test]
    fn test_normalize_path_numeric_id() {
        assert_eq!(normalize_path("/api/radios/12345"), "/api/radios/{id}");
        assert_eq!(normalize_path("/api/radios/7/plays"), "/api/radios/{id}/plays");
    }

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/api/dashboard/essential"), "/api/dashboard/essential");
    }
}
