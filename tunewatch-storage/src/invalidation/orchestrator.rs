//! Invalidation orchestrator.

use super::bus::InvalidationBus;
use super::event::{InvalidationEvent, InvalidationScope};
use super::mutation::MutationMap;
use super::target::InvalidationTarget;
use crate::cache::KeyPattern;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tunewatch_core::{CacheKey, Principal};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default window within which repeated invalidations of one pattern collapse.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Default aggregate view purged after every acknowledged mutation.
pub const DEFAULT_AUTO_PREFIX: &str = "/api/dashboard";

const MUTATING_METHODS: [&str; 4] = ["POST", "PUT", "PATCH", "DELETE"];

// ============================================================================
// WRITE ACKNOWLEDGEMENT
// ============================================================================

/// Proof that a request completed successfully.
///
/// Only constructible from a 2xx status, so auto invalidation cannot be
/// triggered ahead of (or without) a durable write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    method: String,
    status: u16,
    origin: Option<Principal>,
}

impl WriteAck {
    pub fn from_response(method: &str, status: u16, origin: Option<Principal>) -> Option<Self> {
        (200..300).contains(&status).then(|| Self {
            method: method.to_ascii_uppercase(),
            status,
            origin,
        })
    }

    pub fn is_mutating(&self) -> bool {
        MUTATING_METHODS.contains(&self.method.as_str())
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn origin(&self) -> Option<&Principal> {
        self.origin.as_ref()
    }
}

// ============================================================================
// CONFIG & REPORT
// ============================================================================

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub debounce_window: Duration,
    pub auto_patterns: Vec<KeyPattern>,
    pub mutations: MutationMap,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            auto_patterns: vec![KeyPattern::path_prefix(DEFAULT_AUTO_PREFIX)],
            mutations: MutationMap::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    pub fn with_auto_patterns(mut self, patterns: Vec<KeyPattern>) -> Self {
        self.auto_patterns = patterns;
        self
    }

    pub fn with_mutations(mut self, mutations: MutationMap) -> Self {
        self.mutations = mutations;
        self
    }
}

/// Outcome of one or more invalidation passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    /// Entries removed across all targets.
    pub removed: usize,
    /// Entries removed per target name.
    pub per_target: BTreeMap<String, usize>,
    /// Patterns evaluated.
    pub patterns: usize,
}

impl InvalidationReport {
    fn record(&mut self, target: &str, removed: usize) {
        self.removed += removed;
        *self.per_target.entry(target.to_string()).or_default() += removed;
    }

    pub fn merge(&mut self, other: InvalidationReport) {
        self.removed += other.removed;
        self.patterns += other.patterns;
        for (target, removed) in other.per_target {
            *self.per_target.entry(target).or_default() += removed;
        }
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

struct PendingPass {
    pattern: KeyPattern,
    origin: Option<Principal>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl PendingPass {
    fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Shared {
    config: OrchestratorConfig,
    bus: InvalidationBus,
    targets: RwLock<Vec<Arc<dyn InvalidationTarget>>>,
    pending: DashMap<String, PendingPass>,
    next_generation: AtomicU64,
}

impl Shared {
    fn apply(
        &self,
        scope: InvalidationScope,
        mutation_type: Option<&str>,
        origin: Option<&Principal>,
    ) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        if scope.is_empty() {
            return report;
        }

        let targets = self
            .targets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match scope.patterns() {
            Some(patterns) => {
                report.patterns = patterns.len();
                for target in &targets {
                    let removed = patterns.iter().map(|p| target.invalidate(p)).sum();
                    report.record(target.name(), removed);
                }
            }
            None => {
                for target in &targets {
                    report.record(target.name(), target.invalidate_all());
                }
            }
        }

        let mut event = InvalidationEvent::new(scope).with_origin(origin.cloned());
        if let Some(mutation_type) = mutation_type {
            event = event.with_mutation_type(mutation_type);
        }
        self.bus.publish(event);

        tracing::debug!(
            mutation_type = mutation_type.unwrap_or("-"),
            removed = report.removed,
            patterns = report.patterns,
            "invalidation pass"
        );
        report
    }

    fn fire_pending(&self, id: &str, generation: u64) {
        if let Some((_, pass)) = self
            .pending
            .remove_if(id, |_, pass| pass.generation == generation)
        {
            self.apply(
                InvalidationScope::Patterns(vec![pass.pattern]),
                None,
                pass.origin.as_ref(),
            );
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        for mut pass in self.pending.iter_mut() {
            pass.cancel();
        }
    }
}

/// Purges stale cached reads after writes.
///
/// Cloning yields a handle onto the same orchestrator.
#[derive(Clone)]
pub struct InvalidationOrchestrator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for InvalidationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationOrchestrator")
            .field("debounce_window", &self.shared.config.debounce_window)
            .field("pending", &self.shared.pending.len())
            .finish()
    }
}

impl InvalidationOrchestrator {
    pub fn new(config: OrchestratorConfig, bus: InvalidationBus) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                bus,
                targets: RwLock::new(Vec::new()),
                pending: DashMap::new(),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    pub fn register_target(&self, target: Arc<dyn InvalidationTarget>) {
        self.shared
            .targets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(target);
    }

    pub fn bus(&self) -> &InvalidationBus {
        &self.shared.bus
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.shared.config
    }

    /// Direct mode: drop exactly these keys.
    pub fn invalidate_keys(&self, keys: &[CacheKey], origin: Option<&Principal>) -> InvalidationReport {
        self.shared
            .apply(InvalidationScope::Keys(keys.to_vec()), None, origin)
    }

    /// Pattern/cascade mode.
    pub fn invalidate_patterns(
        &self,
        patterns: &[KeyPattern],
        origin: Option<&Principal>,
    ) -> InvalidationReport {
        self.shared
            .apply(InvalidationScope::Patterns(patterns.to_vec()), None, origin)
    }

    pub fn invalidate_all(&self, origin: Option<&Principal>) -> InvalidationReport {
        self.shared.apply(InvalidationScope::All, None, origin)
    }

    /// Cascade for a named mutation type. Unknown types are logged and ignored.
    pub fn invalidate_mutation(
        &self,
        mutation_type: &str,
        origin: Option<&Principal>,
    ) -> InvalidationReport {
        match self.shared.config.mutations.patterns_for(mutation_type, origin) {
            Some(patterns) => self.shared.apply(
                InvalidationScope::Patterns(patterns),
                Some(mutation_type),
                origin,
            ),
            None => {
                tracing::warn!(mutation_type, "unknown mutation type, nothing invalidated");
                InvalidationReport::default()
            }
        }
    }

    /// Debounced mode: schedule a trailing pass for `pattern`.
    ///
    /// Another request for the same pattern within the window replaces the
    /// scheduled pass and restarts the window. Different patterns are
    /// debounced independently. Outside a runtime the pass runs immediately.
    pub fn invalidate_debounced(&self, pattern: KeyPattern, origin: Option<Principal>) {
        let Ok(handle) = Handle::try_current() else {
            self.invalidate_patterns(&[pattern], origin.as_ref());
            return;
        };

        let id = pattern.to_string();
        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
        let pass = PendingPass {
            pattern,
            origin,
            generation,
            timer: None,
        };

        let mut guard = match self.shared.pending.entry(id.clone()) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().cancel();
                occupied.insert(pass);
                occupied.into_ref()
            }
            Entry::Vacant(vacant) => vacant.insert(pass),
        };

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let window = self.shared.config.debounce_window;
        guard.timer = Some(handle.spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(shared) = weak.upgrade() {
                shared.fire_pending(&id, generation);
            }
        }));
    }

    /// Run every scheduled pass now.
    pub fn flush_pending(&self) -> InvalidationReport {
        let ids: Vec<String> = self
            .shared
            .pending
            .iter()
            .map(|pass| pass.key().clone())
            .collect();
        let mut report = InvalidationReport::default();
        for id in ids {
            if let Some((_, mut pass)) = self.shared.pending.remove(&id) {
                pass.cancel();
                report.merge(self.shared.apply(
                    InvalidationScope::Patterns(vec![pass.pattern]),
                    None,
                    pass.origin.as_ref(),
                ));
            }
        }
        report
    }

    /// Drop every scheduled pass without running it.
    pub fn cancel_pending(&self) -> usize {
        let mut cancelled = 0;
        self.shared.pending.retain(|_, pass| {
            pass.cancel();
            cancelled += 1;
            false
        });
        cancelled
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Auto-by-verb mode plus the route's explicit patterns.
    ///
    /// Explicit patterns run for every acknowledged request; the configured
    /// aggregate patterns run only when the acknowledged request was a
    /// mutation.
    pub fn on_write_acknowledged(&self, ack: &WriteAck, explicit: &[KeyPattern]) -> InvalidationReport {
        let mut patterns = explicit.to_vec();
        if ack.is_mutating() {
            for auto in &self.shared.config.auto_patterns {
                if !patterns.contains(auto) {
                    patterns.push(auto.clone());
                }
            }
        }
        self.shared
            .apply(InvalidationScope::Patterns(patterns), None, ack.origin())
    }
}
