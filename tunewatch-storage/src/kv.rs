//! Key-value collaborators for client-held records.
//!
//! The client tier keeps last-known-good results outside its live cache so
//! they survive a reload. The store behind that is an external collaborator;
//! two implementations ship here: an in-memory map and a single JSON file.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tunewatch_core::KvError;

/// Asynchronous string-keyed JSON store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, KvError>;

    async fn put(&self, key: &str, value: Value) -> Result<(), KvError>;

    /// Remove a record. Returns whether one existed.
    async fn remove(&self, key: &str) -> Result<bool, KvError>;

    async fn keys(&self) -> Result<Vec<String>, KvError>;
}

// ============================================================================
// IN-MEMORY
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    records: DashMap<String, Value>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, KvError> {
        Ok(self.records.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), KvError> {
        self.records.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, KvError> {
        Ok(self.records.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, KvError> {
        Ok(self.records.iter().map(|r| r.key().clone()).collect())
    }
}

// ============================================================================
// JSON FILE
// ============================================================================

/// All records in one pretty-printed JSON object on disk.
///
/// Every write rewrites the file through a temporary sibling and a rename,
/// so a crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct JsonFileKeyValueStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, Value>, KvError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(io_error(err)),
        };
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents).map_err(|e| KvError::Corrupt {
            key: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }

    async fn save(&self, records: &BTreeMap<String, Value>) -> Result<(), KvError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
            }
        }
        let contents = serde_json::to_string_pretty(records).map_err(|e| KvError::Io {
            reason: e.to_string(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await.map_err(io_error)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_error)?;
        Ok(())
    }
}

fn io_error(err: std::io::Error) -> KvError {
    KvError::Io {
        reason: err.to_string(),
    }
}

#[async_trait]
impl KeyValueStore for JsonFileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, KvError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), KvError> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        records.insert(key.to_string(), value);
        self.save(&records).await
    }

    async fn remove(&self, key: &str) -> Result<bool, KvError> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        let existed = records.remove(key).is_some();
        if existed {
            self.save(&records).await?;
        }
        Ok(existed)
    }

    async fn keys(&self) -> Result<Vec<String>, KvError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.into_keys().collect())
    }
}
