//! Last-known-good records.
//!
//! Every successful primary fetch leaves a [`FallbackRecord`] in the
//! key-value collaborator. The record outlives the live query cache (it can
//! be file backed) and is only consulted when the primary fetch fails or the
//! caller is offline.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tunewatch_core::{CacheKey, Clock, KvError, Timestamp};
use tunewatch_storage::KeyValueStore;

const KEY_PREFIX: &str = "fallback:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackRecord {
    pub query_key: String,
    pub data: Value,
    pub stored_at: Timestamp,
    pub ttl_ms: u64,
}

impl FallbackRecord {
    pub fn age(&self, now: Timestamp) -> Duration {
        (now - self.stored_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.age(now) > Duration::from_millis(self.ttl_ms)
    }
}

/// A record found for a key, with its staleness already judged.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackLookup {
    pub record: FallbackRecord,
    /// Older than the freshness window but still within the hard TTL.
    pub stale: bool,
}

#[derive(Clone)]
pub struct FallbackStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    hard_ttl: Duration,
    freshness: Duration,
}

impl std::fmt::Debug for FallbackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackStore")
            .field("hard_ttl", &self.hard_ttl)
            .field("freshness", &self.freshness)
            .finish()
    }
}

impl FallbackStore {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        hard_ttl: Duration,
        freshness: Duration,
    ) -> Self {
        Self {
            kv,
            clock,
            hard_ttl,
            freshness,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn storage_key(key: &CacheKey) -> String {
        format!("{}{}", KEY_PREFIX, key.as_str())
    }

    pub async fn put(&self, key: &CacheKey, data: Value) -> Result<(), KvError> {
        let record = FallbackRecord {
            query_key: key.as_str().to_string(),
            data,
            stored_at: self.clock.now(),
            ttl_ms: self.hard_ttl.as_millis() as u64,
        };
        let value = serde_json::to_value(&record).map_err(|e| KvError::Corrupt {
            key: record.query_key.clone(),
            reason: e.to_string(),
        })?;
        self.kv.put(&Self::storage_key(key), value).await
    }

    /// Look up a servable record. Expired and unreadable records are deleted.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<FallbackLookup>, KvError> {
        let storage_key = Self::storage_key(key);
        let Some(raw) = self.kv.get(&storage_key).await? else {
            return Ok(None);
        };

        let record = match serde_json::from_value::<FallbackRecord>(raw) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "discarding corrupt fallback record");
                self.kv.remove(&storage_key).await?;
                return Ok(None);
            }
        };

        let now = self.clock.now();
        if record.is_expired(now) {
            tracing::debug!(key = %key, "fallback record expired");
            self.kv.remove(&storage_key).await?;
            return Ok(None);
        }
        let stale = record.age(now) > self.freshness;
        Ok(Some(FallbackLookup { record, stale }))
    }

    pub async fn remove(&self, key: &CacheKey) -> Result<bool, KvError> {
        self.kv.remove(&Self::storage_key(key)).await
    }

    /// Delete every expired or unreadable record. Returns how many went.
    pub async fn cleanup_expired(&self) -> Result<usize, KvError> {
        let now = self.clock.now();
        let mut removed = 0;
        for storage_key in self.kv.keys().await? {
            if !storage_key.starts_with(KEY_PREFIX) {
                continue;
            }
            let Some(raw) = self.kv.get(&storage_key).await? else {
                continue;
            };
            let expired = serde_json::from_value::<FallbackRecord>(raw)
                .map(|record| record.is_expired(now))
                .unwrap_or(true);
            if expired && self.kv.remove(&storage_key).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(removed, "cleaned up expired fallback records");
        }
        Ok(removed)
    }
}
