//! Integration tests for the response cache and write invalidation middleware.
//!
//! Every test drives the full router with `oneshot`, so identity, caching,
//! invalidation and the handlers run exactly as they do in the server.

mod support;

use axum::http::{Method, Request, StatusCode};
use axum::body::Body;
use serde_json::json;
use std::time::Duration;
use support::*;
use tunewatch_api::ApiConfig;

// ============================================================================
// HIT / MISS
// ============================================================================

#[tokio::test]
async fn test_second_read_is_served_from_cache() {
    let (app, state) = test_app(test_config());

    let first = send(&app, get("/api/dashboard")).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.cache_status(), Some("MISS"));
    assert!(first.header("x-cache-key").unwrap().starts_with("GET:/api/dashboard:"));

    let second = send(&app, get("/api/dashboard")).await;
    assert_eq!(second.cache_status(), Some("HIT"));
    assert_eq!(second.body, first.body);
    assert_eq!(second.header("x-cache-key"), first.header("x-cache-key"));

    // Three sections read once, by the first request only.
    assert_eq!(state.data.reads(), 3);
    let stats = state.cache.stats();
    assert_eq!((stats.hits, stats.misses, stats.sets), (1, 1, 1));
}

#[tokio::test]
async fn test_mutation_invalidates_dashboard_reads() {
    let (app, _state) = test_app(test_config());

    send(&app, get("/api/dashboard")).await;
    send(&app, get("/api/dashboard/essential")).await;
    assert_eq!(send(&app, get("/api/dashboard")).await.cache_status(), Some("HIT"));

    let write = send(&app, json_request(Method::POST, "/api/plays", &json!({}))).await;
    assert_eq!(write.status, StatusCode::OK);
    assert_eq!(write.cache_status(), None);
    assert_eq!(write.header("x-cache-invalidated"), Some("2"));

    let after = send(&app, get("/api/dashboard")).await;
    assert_eq!(after.cache_status(), Some("MISS"));
    assert_eq!(after.body["essential"]["plays_total"], 1);
}

#[tokio::test]
async fn test_failed_write_invalidates_nothing() {
    let (app, state) = test_app(test_config());
    send(&app, get("/api/dashboard/essential")).await;

    let write = send(
        &app,
        json_request(Method::PUT, "/api/dashboard/headline", &json!({"a": 1})),
    )
    .await;
    assert_eq!(write.status, StatusCode::NOT_FOUND);
    assert_eq!(write.header("x-cache-invalidated"), None);
    assert_eq!(state.cache.len(), 1);
}

#[tokio::test]
async fn test_query_order_shares_an_entry() {
    let (app, _state) = test_app(test_config());
    send(&app, get("/api/radios?period=7d&genre=pop")).await;
    let reordered = send(&app, get("/api/radios?genre=pop&period=7d")).await;
    assert_eq!(reordered.cache_status(), Some("HIT"));

    let different = send(&app, get("/api/radios?genre=rock&period=7d")).await;
    assert_eq!(different.cache_status(), Some("MISS"));
}

// ============================================================================
// IDENTITY
// ============================================================================

#[tokio::test]
async fn test_principals_never_share_entries() {
    let (app, state) = test_app(test_config());

    let alice = send(&app, get_as("/api/dashboard", "alice")).await;
    assert_eq!(alice.body["viewer"], "alice");
    let bob = send(&app, get_as("/api/dashboard", "bob")).await;
    assert_eq!(bob.cache_status(), Some("MISS"));
    assert_eq!(bob.body["viewer"], "bob");

    let anonymous = send(&app, get("/api/dashboard")).await;
    assert_eq!(anonymous.cache_status(), Some("MISS"));
    assert_eq!(anonymous.body["viewer"], "@anonymous");

    assert_eq!(send(&app, get_as("/api/dashboard", "alice")).await.cache_status(), Some("HIT"));
    assert_eq!(state.cache.len(), 3);
}

#[tokio::test]
async fn test_identity_header_ignored_unless_trusted() {
    let (app, _state) = test_app(ApiConfig::default());
    let response = send(&app, get_as("/api/dashboard", "mallory")).await;
    assert_eq!(response.body["viewer"], "@anonymous");
    assert!(response.header("x-cache-key").unwrap().contains(":@anonymous:"));
}

// ============================================================================
// ELIGIBILITY
// ============================================================================

#[tokio::test]
async fn test_skip_cache_header_bypasses() {
    let (app, state) = test_app(test_config());
    let request = Request::builder()
        .uri("/api/dashboard")
        .header("x-skip-cache", "1")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.cache_status(), None);
    assert!(state.cache.is_empty());
}

#[tokio::test]
async fn test_disabled_cache_passes_through() {
    let config = ApiConfig {
        cache_enabled: false,
        ..test_config()
    };
    let (app, state) = test_app(config);
    send(&app, get("/api/dashboard")).await;
    let second = send(&app, get("/api/dashboard")).await;
    assert_eq!(second.cache_status(), None);
    assert_eq!(state.data.reads(), 6);
}

#[tokio::test]
async fn test_uncached_route_has_no_annotation() {
    let (app, _state) = test_app(test_config());
    let ping = send(&app, get("/health/ping")).await;
    assert_eq!(ping.body, json!("pong"));
    assert_eq!(ping.cache_status(), None);
}

#[tokio::test]
async fn test_error_responses_are_not_stored() {
    let (app, state) = test_app(test_config());
    let first = send(&app, get("/api/dashboard/headline")).await;
    assert_eq!(first.status, StatusCode::NOT_FOUND);
    assert_eq!(first.cache_status(), Some("MISS"));
    let second = send(&app, get("/api/dashboard/headline")).await;
    assert_eq!(second.cache_status(), Some("MISS"));
    assert!(state.cache.is_empty());
}

#[tokio::test]
async fn test_post_read_keys_on_body() {
    let (app, _state) = test_app(test_config());
    let uri = "/api/dashboard-batch/batch";

    let first = send(
        &app,
        json_request(Method::POST, uri, &json!({"sections": ["essential", "optional"]})),
    )
    .await;
    assert_eq!(first.cache_status(), Some("MISS"));
    assert!(first.body["results"]["essential"].is_object());

    let same = send(
        &app,
        json_request(Method::POST, uri, &json!({"sections": ["essential", "optional"]})),
    )
    .await;
    assert_eq!(same.cache_status(), Some("HIT"));

    let other = send(&app, json_request(Method::POST, uri, &json!({"sections": ["secondary"]}))).await;
    assert_eq!(other.cache_status(), Some("MISS"));
}

#[tokio::test]
async fn test_batch_reads_leave_dashboard_entries_alone() {
    let (app, state) = test_app(test_config());
    let uri = "/api/dashboard-batch/batch";
    let body = json!({"sections": ["essential"]});

    send(&app, get("/api/dashboard")).await;
    let first = send(&app, json_request(Method::POST, uri, &body)).await;
    assert_eq!(first.header("x-cache-invalidated"), None);
    let second = send(&app, json_request(Method::POST, uri, &body)).await;
    assert_eq!(second.cache_status(), Some("HIT"));

    assert_eq!(send(&app, get("/api/dashboard")).await.cache_status(), Some("HIT"));
    assert_eq!(state.cache.len(), 2);
}

// ============================================================================
// DEBOUNCED ROUTE GROUP
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_radio_update_invalidates_after_debounce() {
    let (app, state) = test_app(test_config());
    send(&app, get("/api/radios")).await;
    send(&app, get("/api/radios/1")).await;
    assert_eq!(state.cache.len(), 2);

    for online in [false, true, false] {
        let update = send(
            &app,
            json_request(Method::PUT, "/api/radios/1", &json!({"online": online})),
        )
        .await;
        assert_eq!(update.status, StatusCode::OK);
    }
    assert_eq!(state.orchestrator.pending_count(), 1);
    assert_eq!(state.cache.len(), 2);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(state.orchestrator.pending_count(), 0);
    assert!(state.cache.is_empty());

    let fresh = send(&app, get("/api/radios/1")).await;
    assert_eq!(fresh.cache_status(), Some("MISS"));
    assert_eq!(fresh.body["online"], false);
}

#[tokio::test(start_paused = true)]
async fn test_radio_reads_schedule_no_invalidation() {
    let (app, state) = test_app(test_config());
    send(&app, get("/api/radios")).await;
    send(&app, get("/api/radios/1")).await;
    assert_eq!(state.orchestrator.pending_count(), 0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(send(&app, get("/api/radios")).await.cache_status(), Some("HIT"));
    assert_eq!(state.cache.len(), 2);
}
