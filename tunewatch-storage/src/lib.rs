//! Tunewatch Storage - Cache Store and Invalidation
//!
//! Holds the server-side TTL cache store, the key patterns used to select
//! entries, the mutation invalidation orchestrator with its event bus, and the
//! key-value collaborator used by the client tier for fallback records.
//!
//! Nothing here is a global: every store, bus and orchestrator is an explicit
//! instance owned by whoever wires the process together.

pub mod cache;
pub mod invalidation;
pub mod kv;

pub use cache::{CacheEntry, CacheStats, KeyPattern, TtlCacheStore, Watermark};
pub use invalidation::{
    InvalidationBus, InvalidationEvent, InvalidationOrchestrator, InvalidationReport,
    InvalidationScope, InvalidationTarget, MutationMap, OrchestratorConfig, PatternTemplate, WriteAck,
    DEFAULT_DEBOUNCE_WINDOW,
};
pub use kv::{InMemoryKeyValueStore, JsonFileKeyValueStore, KeyValueStore};
