//! Property-Based Tests for the Retry/Backoff Controller
//!
//! **Property: Bounded delays**
//!
//! For any valid policy and attempt, the scheduled delay SHALL lie within
//! `[base_delay(attempt), base_delay(attempt) * 1.1]` and SHALL never exceed
//! `max_delay_ms`.
//!
//! **Property: Exhaustion stops retrying**
//!
//! For any policy and any always-failing retryable operation, the controller
//! SHALL make exactly `max_retries + 1` attempts and end in `Exhausted`.
//!
//! **Property: Non-retryable failures stop immediately**

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::runtime::Runtime;
use tunewatch_client::{RetryController, RetryPhase, RetryPolicy};
use tunewatch_core::{FetchError, RetryError};
use tunewatch_test_utils::generators::{arb_fetch_error, arb_retry_policy};

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_delay_within_jitter_band(
        policy in arb_retry_policy(),
        attempt in 0u32..20,
        seed in any::<u64>(),
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let base = policy.base_delay(attempt);
        let delay = policy.delay_for(attempt, &mut rng);

        prop_assert!(base <= Duration::from_millis(policy.max_delay_ms));
        prop_assert!(delay >= base);
        prop_assert!(delay <= Duration::from_millis(policy.max_delay_ms));
        let ceiling = base.as_millis() as f64 * 1.1 + 1.0;
        prop_assert!(delay.as_millis() as f64 <= ceiling);
    }

    #[test]
    fn prop_delays_never_shrink(policy in arb_retry_policy(), attempt in 0u32..20) {
        prop_assert!(policy.base_delay(attempt + 1) >= policy.base_delay(attempt));
    }

    #[test]
    fn prop_exhaustion_after_budget(policy in arb_retry_policy()) {
        let rt = test_runtime()?;
        let calls = AtomicU32::new(0);
        let controller = RetryController::new(policy);
        let result: Result<(), RetryError> = rt.block_on(controller.run(|_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::status(503, "unavailable")) }
        }));

        prop_assert_eq!(calls.load(Ordering::SeqCst), policy.max_retries + 1);
        let exhausted = matches!(result, Err(RetryError::Exhausted { attempts, .. }) if attempts == policy.max_retries + 1);
        prop_assert!(exhausted);
        let phase_exhausted = matches!(controller.phase(), RetryPhase::Exhausted { .. });
        prop_assert!(phase_exhausted);
    }

    #[test]
    fn prop_only_transient_failures_are_retried(
        policy in arb_retry_policy(),
        error in arb_fetch_error(),
    ) {
        let rt = test_runtime()?;
        let calls = AtomicU32::new(0);
        let controller = RetryController::new(policy);
        let result: Result<(), RetryError> = rt.block_on(controller.run(|_| {
            calls.fetch_add(1, Ordering::SeqCst);
            let error = error.clone();
            async move { Err(error) }
        }));

        let expected = if error.is_retryable() { policy.max_retries + 1 } else { 1 };
        prop_assert_eq!(calls.load(Ordering::SeqCst), expected);
        if error.is_offline() {
            prop_assert_eq!(result, Err(RetryError::OfflineDetected));
        } else if !error.is_retryable() {
            prop_assert_eq!(result, Err(RetryError::NotRetryable(error)));
        }
    }
}

#[test]
fn test_documented_delay_curve() {
    let policy = RetryPolicy::new(3, 1000, 2.0, 30_000);
    let mut rng = StdRng::seed_from_u64(42);
    for (attempt, expected) in [(0, 1000u64), (1, 2000), (2, 4000)] {
        let delay = policy.delay_for(attempt, &mut rng).as_millis() as u64;
        assert!(delay >= expected && delay <= expected + expected / 10, "attempt {}: {}ms", attempt, delay);
    }
}
