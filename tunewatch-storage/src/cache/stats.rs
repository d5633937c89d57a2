//! Cache usage statistics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of cache usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Reads that returned a live entry.
    pub hits: u64,
    /// Reads that found nothing or an expired entry.
    pub misses: u64,
    /// Entries stored.
    pub sets: u64,
    /// Entries removed by delete or invalidation.
    pub deletes: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    /// hits + misses
    pub total_requests: u64,
    /// hits / (hits + misses), 0.0 before any read.
    pub hit_rate: f64,
    /// Number of entries currently held.
    pub size: usize,
    /// Approximate memory usage in bytes (key length plus serialized value length).
    pub approx_memory_bytes: u64,
}

impl CacheStats {
    pub fn hit_rate_of(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Hit rate rendered as a percentage string, e.g. `"66.67%"`.
    pub fn hit_rate_percent(&self) -> String {
        format!("{:.2}%", self.hit_rate * 100.0)
    }
}

/// Live counters behind a store.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub sets: AtomicU64,
    pub deletes: AtomicU64,
    pub expirations: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.sets,
            &self.deletes,
            &self.expirations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, size: usize, approx_memory_bytes: u64) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStats {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            total_requests: hits + misses,
            hit_rate: CacheStats::hit_rate_of(hits, misses),
            size,
            approx_memory_bytes,
        }
    }
}
