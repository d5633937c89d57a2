//! Server-side response cache.
//!
//! Serves repeated reads of cache-enabled routes from the TTL store. A request
//! is eligible when the cache is switched on, the method is GET or POST, the
//! route's rule is enabled, and the caller did not send `x-skip-cache`.
//! Eligible responses carry `X-Cache` (`HIT` or `MISS`) and `X-Cache-Key`;
//! anything else passes through untouched.
//!
//! Only successful JSON responses are stored, and a response whose key was
//! invalidated while the handler ran is returned but not stored.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tunewatch_core::{fingerprint, CacheKey, Principal, QueryParams};
use tunewatch_storage::Watermark;

use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// HEADERS
// ============================================================================

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const X_CACHE_KEY: HeaderName = HeaderName::from_static("x-cache-key");

/// Request header that bypasses the cache for one request.
pub const X_SKIP_CACHE: HeaderName = HeaderName::from_static("x-skip-cache");

// ============================================================================
// TYPES
// ============================================================================

/// A stored response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub body: Value,
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        (status, Json(self.body)).into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

enum Buffered {
    Eligible(Request, Option<Value>),
    Ineligible(Request),
}

// ============================================================================
// MIDDLEWARE
// ============================================================================

pub async fn response_cache_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.cache_enabled {
        return next.run(request).await;
    }
    let method = request.method().clone();
    if method != Method::GET && method != Method::POST {
        return next.run(request).await;
    }
    let route = state.routes.resolve(request.uri().path());
    if !route.is_cacheable() || request.headers().contains_key(X_SKIP_CACHE) {
        return next.run(request).await;
    }
    let Some(query) = parse_query(request.uri().query()) else {
        tracing::debug!(uri = %request.uri(), "unparseable query string, bypassing cache");
        return next.run(request).await;
    };

    let path = request.uri().path().to_string();
    let principal = request.extensions().get::<Principal>().cloned();

    let (request, body) = if method == Method::POST {
        match buffer_body(request, state.config.max_body_bytes).await {
            Ok(Buffered::Eligible(request, body)) => (request, body),
            Ok(Buffered::Ineligible(request)) => return next.run(request).await,
            Err(err) => return err.into_response(),
        }
    } else {
        (request, None)
    };

    let key = fingerprint(
        method.as_str(),
        &path,
        principal.as_ref(),
        &query,
        body.as_ref(),
    );

    if let Some(cached) = state.cache.get(key.as_str()) {
        tracing::debug!(key = %key, "response cache hit");
        let mut response = cached.into_response();
        annotate(response.headers_mut(), CacheStatus::Hit, &key);
        return response;
    }

    let watermark = state.cache.watermark();
    let response = next.run(request).await;
    let mut response = store_if_cacheable(&state, &key, route.ttl(), watermark, response).await;
    annotate(response.headers_mut(), CacheStatus::Miss, &key);
    response
}

fn parse_query(raw: Option<&str>) -> Option<QueryParams> {
    let Some(raw) = raw.filter(|q| !q.is_empty()) else {
        return Some(QueryParams::new());
    };
    serde_urlencoded::from_str::<Vec<(String, String)>>(raw)
        .ok()
        .map(QueryParams::from_pairs)
}

/// Buffer a POST body so it can be fingerprinted and then replayed.
///
/// Bodies that declare a length over the limit, or that are not JSON, make the
/// request ineligible instead of failing it.
async fn buffer_body(request: Request, limit: usize) -> Result<Buffered, ApiError> {
    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Ok(Buffered::Ineligible(request));
    }

    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, limit)
        .await
        .map_err(|_| ApiError::payload_too_large(limit))?;
    let parsed = if bytes.is_empty() {
        Some(None)
    } else {
        serde_json::from_slice::<Value>(&bytes).ok().map(Some)
    };

    let request = Request::from_parts(parts, Body::from(bytes));
    Ok(match parsed {
        Some(body) => Buffered::Eligible(request, body),
        None => Buffered::Ineligible(request),
    })
}

async fn store_if_cacheable(
    state: &AppState,
    key: &CacheKey,
    ttl: Duration,
    watermark: Watermark,
    response: Response,
) -> Response {
    if !response.status().is_success() || !is_json(response.headers()) {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(key = %key, error = %err, "failed to buffer response body");
            return ApiError::internal_error("Failed to read response body").into_response();
        }
    };

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(body) => {
            let cached = CachedResponse {
                status: parts.status.as_u16(),
                body,
            };
            if let Err(err) = state
                .cache
                .set_unless_invalidated(key.as_str(), cached, ttl, watermark)
            {
                tracing::debug!(key = %key, error = %err, "response not cached");
            }
        }
        Err(err) => tracing::debug!(key = %key, error = %err, "response body is not JSON, not cached"),
    }

    Response::from_parts(parts, Body::from(bytes))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false)
}

fn annotate(headers: &mut HeaderMap, status: CacheStatus, key: &CacheKey) {
    headers.insert(X_CACHE, HeaderValue::from_static(status.as_str()));
    if let Ok(value) = HeaderValue::from_str(&key.header_value()) {
        headers.insert(X_CACHE_KEY, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_repeats_and_decoding() {
        let query = parse_query(Some("period=7d&genre=pop&genre=rock%20br")).unwrap();
        assert_eq!(query.get("period"), Some(&["7d".to_string()][..]));
        assert_eq!(
            query.get("genre"),
            Some(&["pop".to_string(), "rock br".to_string()][..])
        );
        assert!(parse_query(None).unwrap().is_empty());
        assert!(parse_query(Some("")).unwrap().is_empty());
    }

    #[test]
    fn test_is_json() {
        let mut headers = HeaderMap::new();
        assert!(!is_json(&headers));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        assert!(is_json(&headers));
    }

    #[test]
    fn test_cached_response_restores_status() {
        let response = CachedResponse {
            status: 203,
            body: serde_json::json!({"ok": true}),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::NON_AUTHORITATIVE_INFORMATION);
        assert!(is_json(response.headers()));
    }
}
