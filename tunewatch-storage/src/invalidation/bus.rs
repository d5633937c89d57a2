//! Broadcast bus for invalidation events.

use super::event::InvalidationEvent;
use super::target::InvalidationTarget;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of invalidation events to any number of subscribers.
///
/// Delivery is best effort: a subscriber that falls more than the channel
/// capacity behind loses the oldest events.
#[derive(Debug, Clone)]
pub struct InvalidationBus {
    sender: broadcast::Sender<Arc<InvalidationEvent>>,
}

impl InvalidationBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Returns the number of subscribers that received it.
    pub fn publish(&self, event: InvalidationEvent) -> usize {
        self.sender.send(Arc::new(event)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<InvalidationEvent>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Apply every received event to `target` until the bus is dropped.
    ///
    /// Use this for tiers that are not registered directly with the
    /// orchestrator, otherwise they would see each pass twice.
    pub fn spawn_applier(&self, target: Arc<dyn InvalidationTarget>) -> JoinHandle<()> {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let removed: usize = match event.scope.patterns() {
                            Some(patterns) => patterns.iter().map(|p| target.invalidate(p)).sum(),
                            None => target.invalidate_all(),
                        };
                        tracing::debug!(tier = target.name(), removed, "applied invalidation event");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(tier = target.name(), skipped, "invalidation subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}
