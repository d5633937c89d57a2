//! Mutation-driven cache invalidation.
//!
//! After a write is acknowledged, the [`InvalidationOrchestrator`] computes
//! which cached reads are stale and removes them from every registered
//! [`InvalidationTarget`] (server store, client query cache). Each pass is
//! also published on the [`InvalidationBus`] for any other observer.
//!
//! Modes:
//! - direct: explicit keys
//! - pattern/cascade: prefixes or regexes, or a named mutation type resolved
//!   through the [`MutationMap`]
//! - debounced: bursts on the same pattern collapse into one trailing pass
//! - auto-by-verb: every acknowledged mutating request also purges the
//!   configured aggregate views

mod bus;
mod event;
mod mutation;
mod orchestrator;
mod target;

pub use bus::InvalidationBus;
pub use event::{InvalidationEvent, InvalidationScope};
pub use mutation::{MutationMap, PatternTemplate};
pub use orchestrator::{
    InvalidationOrchestrator, InvalidationReport, OrchestratorConfig, WriteAck,
    DEFAULT_DEBOUNCE_WINDOW,
};
pub use target::InvalidationTarget;
