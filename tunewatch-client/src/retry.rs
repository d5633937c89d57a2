//! Retry/backoff controller.
//!
//! One controller governs one operation. Each failed attempt that may be
//! retried schedules the next after `min(base * multiplier^attempt, max)` plus
//! up to 10% jitter (never past `max`). When the budget is spent the
//! controller reports [`RetryPhase::Exhausted`] and stops. Progress is
//! published on a watch channel so a UI can render "retrying in 4s".
//!
//! A manual retry preempts a scheduled one without resetting the attempt
//! count; the next [`RetryController::run`] after exhaustion starts a fresh
//! cycle.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tunewatch_core::{FetchError, Priority, RetryError, Timestamp};

use crate::offline::Connectivity;

// ============================================================================
// POLICY
// ============================================================================

fn default_jitter_ratio() -> f64 {
    0.1
}

/// Retry budget and delay curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, base_delay_ms: u64, backoff_multiplier: f64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            backoff_multiplier,
            max_delay_ms,
            jitter_ratio: 0.1,
        }
    }

    /// Essential sections and critical operations.
    pub const fn critical() -> Self {
        Self::new(3, 1_000, 2.0, 30_000)
    }

    pub const fn standard() -> Self {
        Self::new(2, 2_000, 2.0, 30_000)
    }

    /// Short, quick retries for backend queries.
    pub const fn database() -> Self {
        Self::new(2, 500, 2.0, 10_000)
    }

    /// Fail on the first error.
    pub const fn none() -> Self {
        Self::new(0, 0, 1.0, 0)
    }

    pub fn for_priority(priority: Priority) -> Self {
        match priority {
            Priority::Essential => Self::critical(),
            Priority::Secondary => Self::standard(),
            Priority::Optional => Self::none(),
        }
    }

    /// Delay before retry number `attempt + 1`, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Delay with up to `jitter_ratio` extra, never exceeding `max_delay_ms`.
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt);
        let spread = (base.as_millis() as f64 * self.jitter_ratio) as u64;
        let jitter = if spread == 0 {
            0
        } else {
            rng.random_range(0..=spread)
        };
        let max = Duration::from_millis(self.max_delay_ms);
        (base + Duration::from_millis(jitter)).min(max.max(base))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries > 0 && self.base_delay_ms == 0 {
            return Err("base_delay_ms must be > 0 when retries are enabled".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("max_delay_ms must be >= base_delay_ms".to_string());
        }
        if self.backoff_multiplier < 1.0 {
            return Err("backoff_multiplier must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err("jitter_ratio must be within 0.0..=1.0".to_string());
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::critical()
    }
}

// ============================================================================
// STATE
// ============================================================================

/// Where an operation is in its retry cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryPhase {
    Idle,
    Attempting { attempt: u32 },
    Scheduled { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    Failed { error: FetchError },
    Exhausted { attempts: u32, error: FetchError },
    Cancelled,
}

impl RetryPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Failed { .. } | Self::Exhausted { .. } | Self::Cancelled
        )
    }
}

/// Bookkeeping for the in-flight operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempt_count: u32,
    pub last_attempt_at: Option<Timestamp>,
    pub next_delay: Option<Duration>,
}

// ============================================================================
// CONTROLLER
// ============================================================================

pub struct RetryController {
    policy: RetryPolicy,
    phase: watch::Sender<RetryPhase>,
    state: Mutex<RetryState>,
    manual: Notify,
    cancel: Notify,
    cancelled: AtomicBool,
    connectivity: Option<watch::Receiver<Connectivity>>,
}

impl std::fmt::Debug for RetryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryController")
            .field("policy", &self.policy)
            .field("phase", &*self.phase.borrow())
            .finish()
    }
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        let (phase, _) = watch::channel(RetryPhase::Idle);
        Self {
            policy,
            phase,
            state: Mutex::new(RetryState::default()),
            manual: Notify::new(),
            cancel: Notify::new(),
            cancelled: AtomicBool::new(false),
            connectivity: None,
        }
    }

    /// Refuse to attempt while `connectivity` reports offline.
    pub fn with_connectivity(mut self, connectivity: watch::Receiver<Connectivity>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn phase(&self) -> RetryPhase {
        self.phase.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RetryPhase> {
        self.phase.subscribe()
    }

    pub fn state(&self) -> RetryState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Skip the pending delay and attempt now. No effect unless a retry is scheduled.
    pub fn retry_now(&self) {
        self.manual.notify_waiters();
    }

    /// Abandon the operation; a scheduled retry never fires.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn is_offline(&self) -> bool {
        self.connectivity
            .as_ref()
            .is_some_and(|rx| *rx.borrow() == Connectivity::Offline)
    }

    fn update_state(&self, f: impl FnOnce(&mut RetryState)) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state);
    }

    fn set_phase(&self, phase: RetryPhase) {
        self.phase.send_replace(phase);
    }

    fn finish_cancelled(&self) -> RetryError {
        self.set_phase(RetryPhase::Cancelled);
        self.update_state(|s| s.next_delay = None);
        RetryError::Cancelled
    }

    /// Drive `operation` to success or a terminal failure.
    ///
    /// `operation` receives the zero-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        self.update_state(|s| *s = RetryState::default());
        let mut attempt: u32 = 0;

        loop {
            if self.is_cancelled() {
                return Err(self.finish_cancelled());
            }
            if self.is_offline() {
                self.set_phase(RetryPhase::Failed {
                    error: FetchError::Offline,
                });
                return Err(RetryError::OfflineDetected);
            }

            self.set_phase(RetryPhase::Attempting { attempt });
            self.update_state(|s| {
                s.attempt_count = attempt + 1;
                s.last_attempt_at = Some(Utc::now());
                s.next_delay = None;
            });

            let error = match operation(attempt).await {
                Ok(value) => {
                    self.set_phase(RetryPhase::Succeeded {
                        attempts: attempt + 1,
                    });
                    self.update_state(|s| *s = RetryState::default());
                    return Ok(value);
                }
                Err(error) => error,
            };

            if self.is_cancelled() {
                return Err(self.finish_cancelled());
            }
            if error.is_offline() {
                self.set_phase(RetryPhase::Failed { error });
                return Err(RetryError::OfflineDetected);
            }
            if !error.is_retryable() {
                self.set_phase(RetryPhase::Failed {
                    error: error.clone(),
                });
                return Err(RetryError::NotRetryable(error));
            }
            if attempt >= self.policy.max_retries {
                tracing::warn!(
                    attempts = attempt + 1,
                    error = %error,
                    "max retries reached"
                );
                self.set_phase(RetryPhase::Exhausted {
                    attempts: attempt + 1,
                    error: error.clone(),
                });
                return Err(RetryError::Exhausted {
                    attempts: attempt + 1,
                    last: error,
                });
            }

            let delay = self.policy.delay_for(attempt, &mut rand::rng());
            attempt += 1;
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "retry scheduled");
            self.update_state(|s| s.next_delay = Some(delay));

            // Register both waiters before anyone can observe `Scheduled`.
            let manual = self.manual.notified();
            let cancel = self.cancel.notified();
            tokio::pin!(manual, cancel);
            manual.as_mut().enable();
            cancel.as_mut().enable();
            self.set_phase(RetryPhase::Scheduled { attempt, delay });
            if self.is_cancelled() {
                return Err(self.finish_cancelled());
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut manual => {
                    tracing::debug!(attempt, "manual retry preempted scheduled delay");
                }
                _ = &mut cancel => {
                    return Err(self.finish_cancelled());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[test]
    fn test_delay_curve() {
        let policy = RetryPolicy::critical();
        assert_eq!(policy.base_delay(0), Duration::from_millis(1000));
        assert_eq!(policy.base_delay(1), Duration::from_millis(2000));
        assert_eq!(policy.base_delay(2), Duration::from_millis(4000));
        assert_eq!(policy.base_delay(10), Duration::from_millis(30_000));
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::critical();
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..8 {
            let base = policy.base_delay(attempt);
            let delay = policy.delay_for(attempt, &mut rng);
            assert!(delay >= base);
            assert!(delay.as_millis() as f64 <= base.as_millis() as f64 * 1.1 + 1.0);
            assert!(delay <= Duration::from_millis(policy.max_delay_ms));
        }
    }

    #[test]
    fn test_named_policies() {
        assert_eq!(RetryPolicy::standard().max_retries, 2);
        assert_eq!(RetryPolicy::database().max_delay_ms, 10_000);
        assert_eq!(RetryPolicy::for_priority(Priority::Optional), RetryPolicy::none());
        assert!(RetryPolicy::none().validate().is_ok());
        assert!(RetryPolicy::new(2, 100, 0.5, 1000).validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let controller = RetryController::new(RetryPolicy::critical());
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let result = controller
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(FetchError::network("connection reset"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(controller.phase(), RetryPhase::Succeeded { attempts: 3 });
        assert_eq!(controller.state(), RetryState::default());
        // 1000 + 2000 with at most 10% jitter each.
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(3000));
        assert!(waited <= Duration::from_millis(3300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_stops_retrying() {
        let controller = RetryController::new(RetryPolicy::critical());
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = controller
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::status(503, "unavailable")) }
            })
            .await;
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 4, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(controller.phase(), RetryPhase::Exhausted { attempts: 4, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_are_not_retried() {
        let controller = RetryController::new(RetryPolicy::critical());
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = controller
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::status(403, "forbidden")) }
            })
            .await;
        assert!(matches!(result, Err(RetryError::NotRetryable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_is_never_retried() {
        let (tx, rx) = watch::channel(Connectivity::Online);
        let controller = RetryController::new(RetryPolicy::critical()).with_connectivity(rx);
        let result: Result<(), _> = controller
            .run(|_| async { Err(FetchError::Offline) })
            .await;
        assert_eq!(result, Err(RetryError::OfflineDetected));

        tx.send_replace(Connectivity::Offline);
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = controller
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert_eq!(result, Err(RetryError::OfflineDetected));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_retry_preempts_delay_without_reset() {
        let controller = Arc::new(RetryController::new(RetryPolicy::critical()));
        let mut phases = controller.subscribe();
        let runner = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .run(|attempt| async move {
                        if attempt == 0 {
                            Err(FetchError::Timeout { timeout_ms: 10 })
                        } else {
                            Ok(attempt)
                        }
                    })
                    .await
            })
        };

        loop {
            phases.changed().await.unwrap();
            if matches!(*phases.borrow(), RetryPhase::Scheduled { .. }) {
                break;
            }
        }
        let start = tokio::time::Instant::now();
        controller.retry_now();
        let result = runner.await.unwrap();
        assert_eq!(result, Ok(1));
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_manual_retry_on_first_sight_of_schedule() {
        for _ in 0..20 {
            let controller = Arc::new(RetryController::new(RetryPolicy::new(1, 10_000, 2.0, 10_000)));
            let mut phases = controller.subscribe();
            let observer = {
                let controller = controller.clone();
                tokio::spawn(async move {
                    phases
                        .wait_for(|phase| matches!(phase, RetryPhase::Scheduled { .. }))
                        .await
                        .unwrap();
                    controller.retry_now();
                })
            };

            let result = tokio::time::timeout(
                Duration::from_secs(2),
                controller.run(|attempt| async move {
                    if attempt == 0 {
                        Err(FetchError::network("reset"))
                    } else {
                        Ok(attempt)
                    }
                }),
            )
            .await;
            assert_eq!(result, Ok(Ok(1)));
            observer.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_scheduled_retry() {
        let controller = Arc::new(RetryController::new(RetryPolicy::critical()));
        let mut phases = controller.subscribe();
        let calls = Arc::new(AtomicU32::new(0));
        let runner = {
            let controller = controller.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                controller
                    .run(|_| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async { Err::<(), _>(FetchError::network("down")) }
                    })
                    .await
            })
        };

        loop {
            phases.changed().await.unwrap();
            if matches!(*phases.borrow(), RetryPhase::Scheduled { .. }) {
                break;
            }
        }
        controller.cancel();
        assert_eq!(runner.await.unwrap(), Err(RetryError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(controller.phase(), RetryPhase::Cancelled);
    }
}
