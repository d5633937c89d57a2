//! Connectivity tracking and the offline replay queue.

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tunewatch_core::{CacheKey, FetchError};

use crate::api_client::ApiClient;

// ============================================================================
// CONNECTIVITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

/// Broadcasts the current connectivity to every interested task.
#[derive(Debug, Clone)]
pub struct OfflineDetector {
    tx: Arc<watch::Sender<Connectivity>>,
}

impl Default for OfflineDetector {
    fn default() -> Self {
        Self::new(Connectivity::Online)
    }
}

impl OfflineDetector {
    pub fn new(initial: Connectivity) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Connectivity {
        *self.tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current() == Connectivity::Online
    }

    /// Record a new observation. Returns whether it changed anything.
    pub fn set(&self, connectivity: Connectivity) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == connectivity {
                false
            } else {
                *current = connectivity;
                true
            }
        });
        if changed {
            tracing::info!(connectivity = ?connectivity, "connectivity changed");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }

    /// Probe the backend once and record the result.
    pub async fn probe(&self, client: &ApiClient, path: &str, timeout: Duration) -> Connectivity {
        let connectivity = if client.probe(path, timeout).await {
            Connectivity::Online
        } else {
            Connectivity::Offline
        };
        self.set(connectivity);
        connectivity
    }

    /// Probe every `interval` until the handle is aborted.
    pub fn spawn_probe_loop(
        &self,
        client: ApiClient,
        path: String,
        interval: Duration,
        timeout: Duration,
    ) -> JoinHandle<()> {
        let detector = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                detector.probe(&client, &path, timeout).await;
            }
        })
    }
}

// ============================================================================
// OFFLINE QUEUE
// ============================================================================

/// Outcome of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub replayed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failed again for lack of connectivity and put back in the queue.
    pub requeued: usize,
}

/// Queries attempted while offline, refetched once connectivity returns.
///
/// A key is queued at most once.
#[derive(Debug, Clone, Default)]
pub struct OfflineQueue {
    keys: Arc<Mutex<VecDeque<CacheKey>>>,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the key was already queued.
    pub fn enqueue(&self, key: CacheKey) -> bool {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        if keys.contains(&key) {
            return false;
        }
        tracing::debug!(key = %key, "query queued for replay");
        keys.push_back(key);
        true
    }

    pub fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<CacheKey> {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    fn drain(&self) -> Vec<CacheKey> {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }

    /// Refetch every queued key, `batch_size` at a time with `pause` between batches.
    ///
    /// Keys that fail with [`FetchError::Offline`] go back in the queue; other
    /// failures are dropped.
    pub async fn replay<F, Fut>(&self, batch_size: usize, pause: Duration, refetch: F) -> ReplayReport
    where
        F: Fn(CacheKey) -> Fut,
        Fut: Future<Output = Result<(), FetchError>>,
    {
        let pending = self.drain();
        let mut report = ReplayReport::default();
        if pending.is_empty() {
            return report;
        }
        tracing::info!(queued = pending.len(), batch_size, "replaying offline queue");

        let batch_size = batch_size.max(1);
        let batches: Vec<&[CacheKey]> = pending.chunks(batch_size).collect();
        let last = batches.len().saturating_sub(1);
        for (index, batch) in batches.into_iter().enumerate() {
            let results = join_all(batch.iter().cloned().map(&refetch)).await;
            for (key, result) in batch.iter().zip(results) {
                report.replayed += 1;
                match result {
                    Ok(()) => report.succeeded += 1,
                    Err(FetchError::Offline) => {
                        report.failed += 1;
                        if self.enqueue(key.clone()) {
                            report.requeued += 1;
                        }
                    }
                    Err(err) => {
                        report.failed += 1;
                        tracing::debug!(key = %key, error = %err, "replay failed");
                    }
                }
            }
            if index < last && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
        report
    }
}
