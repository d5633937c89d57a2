//! Invalidation after acknowledged writes.
//!
//! Runs after the handler. When a mutating request gets a 2xx response the
//! layer invalidates its route group's explicit patterns and, for auto layers,
//! the orchestrator's aggregate patterns. Reads never invalidate. The number of entries removed is reported in
//! `X-Cache-Invalidated`.

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tunewatch_core::Principal;
use tunewatch_storage::{InvalidationOrchestrator, KeyPattern, WriteAck};

pub const X_CACHE_INVALIDATED: HeaderName = HeaderName::from_static("x-cache-invalidated");

/// Per-layer invalidation settings.
#[derive(Clone)]
pub struct InvalidationState {
    orchestrator: InvalidationOrchestrator,
    patterns: Arc<[KeyPattern]>,
    debounce: bool,
    auto: bool,
}

impl InvalidationState {
    /// Aggregate patterns after every mutation, nothing else.
    pub fn auto(orchestrator: InvalidationOrchestrator) -> Self {
        Self {
            orchestrator,
            patterns: Arc::from(Vec::new()),
            debounce: false,
            auto: true,
        }
    }

    /// Explicit patterns for one route group.
    pub fn explicit(orchestrator: InvalidationOrchestrator, patterns: Vec<KeyPattern>) -> Self {
        Self {
            orchestrator,
            patterns: Arc::from(patterns),
            debounce: false,
            auto: false,
        }
    }

    /// Schedule explicit patterns through the orchestrator's debouncer.
    pub fn debounced(mut self) -> Self {
        self.debounce = true;
        self
    }

    /// Run the passes this layer owns, returning entries removed right away.
    fn apply(&self, ack: &WriteAck) -> usize {
        let mut removed = 0;
        if !self.patterns.is_empty() {
            if self.debounce {
                for pattern in self.patterns.iter() {
                    self.orchestrator
                        .invalidate_debounced(pattern.clone(), ack.origin().cloned());
                }
            } else {
                removed += self
                    .orchestrator
                    .invalidate_patterns(&self.patterns, ack.origin())
                    .removed;
            }
        }
        if self.auto {
            removed += self.orchestrator.on_write_acknowledged(ack, &[]).removed;
        }
        removed
    }
}

pub async fn invalidation_middleware(
    State(state): State<InvalidationState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let origin = request.extensions().get::<Principal>().cloned();

    let mut response = next.run(request).await;

    let Some(ack) = WriteAck::from_response(method.as_str(), response.status().as_u16(), origin)
        .filter(WriteAck::is_mutating)
    else {
        return response;
    };

    let removed = state.apply(&ack);
    if removed > 0 {
        tracing::debug!(method = %method, removed, "invalidated cached reads after write");
        response
            .headers_mut()
            .insert(X_CACHE_INVALIDATED, HeaderValue::from(removed));
    }
    response
}
