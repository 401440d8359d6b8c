//! Bounded retry with exponential backoff, multiplicative jitter, and a
//! circuit breaker, used to wrap the recipe-execution + validator step when
//! `options.retries > 0`.
//!
//! Backoff is `base_ms * 2^(attempt-1)`, capped, then scaled by a jitter
//! factor drawn uniformly from `[0.5, 1.0)`. Retries are only attempted for
//! errors whose [`CrucibleError::recoverable`] is true.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::Rng;

use crate::error::CrucibleError;

/// Retry policy: attempt budget and backoff shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (0 = run once).
    pub max_retries: u8,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 0,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    pub fn from_retries(max_retries: u8) -> Self {
        RetryPolicy {
            max_retries,
            ..Default::default()
        }
    }

    /// Delay before the attempt numbered `attempt` (1-indexed), including
    /// jitter ∈ [0.5, 1.0) applied multiplicatively to the exponential term.
    fn backoff_for(&self, attempt: u8) -> Duration {
        let exp = self.backoff_base_ms.saturating_mul(1u64 << (attempt.saturating_sub(1)));
        let capped = exp.min(self.backoff_cap_ms);
        let jitter = rand::thread_rng().gen_range(0.5..1.0);
        Duration::from_millis((capped as f64 * jitter) as u64)
    }
}

/// Atomic circuit breaker that opens after `threshold` consecutive failures.
#[derive(Debug)]
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    threshold: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        CircuitBreaker {
            consecutive_failures: AtomicU32::new(0),
            threshold,
        }
    }

    pub fn is_open(&self) -> bool {
        self.consecutive_failures.load(Ordering::Relaxed) >= self.threshold
    }

    pub fn record_failure(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

/// Outcome of a retried operation.
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub attempts: u8,
    pub value: T,
}

/// Run `op` under `policy`, retrying recoverable failures with exponential
/// backoff + jitter, and bailing immediately on non-recoverable errors or an
/// open circuit breaker.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    breaker: &CircuitBreaker,
    mut op: F,
) -> Result<RetryOutcome<T>, CrucibleError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CrucibleError>>,
{
    let max_attempts = policy.max_retries as u16 + 1;

    for attempt in 1..=max_attempts {
        if breaker.is_open() {
            return Err(CrucibleError::execution(
                format!(
                    "circuit breaker open after {} consecutive failures",
                    breaker.failure_count()
                ),
                false,
            ));
        }

        match op().await {
            Ok(value) => {
                breaker.record_success();
                return Ok(RetryOutcome {
                    attempts: attempt as u8,
                    value,
                });
            }
            Err(err) => {
                breaker.record_failure();
                let is_last = attempt == max_attempts;
                if is_last || !err.recoverable() {
                    return Err(err);
                }
                tokio::time::sleep(policy.backoff_for(attempt as u8)).await;
            }
        }
    }

    unreachable!("loop always returns on its final iteration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32 as Counter;
    use std::sync::Arc;

    #[test]
    fn circuit_breaker_opens_at_threshold() {
        let cb = CircuitBreaker::new(3);
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.is_open());
        cb.record_failure();
        assert!(cb.is_open());
    }

    #[test]
    fn circuit_breaker_resets_on_success() {
        let cb = CircuitBreaker::new(2);
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn backoff_grows_exponentially_and_respects_cap() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 3_000,
        };
        let d1 = policy.backoff_for(1);
        let d5 = policy.backoff_for(5);
        assert!(d1.as_millis() <= 1_000);
        assert!(d5.as_millis() <= 3_000);
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt_without_retrying() {
        let policy = RetryPolicy::from_retries(3);
        let breaker = CircuitBreaker::new(5);
        let outcome = retry_with_backoff(&policy, &breaker, || async { Ok::<_, CrucibleError>(42) })
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.value, 42);
    }

    #[tokio::test]
    async fn retries_recoverable_errors_until_success() {
        let mut policy = RetryPolicy::from_retries(3);
        policy.backoff_base_ms = 1;
        policy.backoff_cap_ms = 2;
        let breaker = CircuitBreaker::new(10);
        let counter = Arc::new(Counter::new(0));
        let c = counter.clone();

        let outcome = retry_with_backoff(&policy, &breaker, move || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::Relaxed);
                if n < 2 {
                    Err(CrucibleError::execution("transient", true))
                } else {
                    Ok(99)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.value, 99);
    }

    #[tokio::test]
    async fn non_recoverable_error_aborts_without_retry() {
        let policy = RetryPolicy::from_retries(5);
        let breaker = CircuitBreaker::new(10);
        let counter = Arc::new(Counter::new(0));
        let c = counter.clone();

        let result = retry_with_backoff(&policy, &breaker, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::Relaxed);
                Err::<i32, _>(CrucibleError::validation("bad config"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn open_circuit_breaker_blocks_before_attempting() {
        let mut policy = RetryPolicy::from_retries(1);
        policy.backoff_base_ms = 1;
        let breaker = CircuitBreaker::new(1);
        breaker.record_failure();

        let result = retry_with_backoff(&policy, &breaker, || async {
            Ok::<_, CrucibleError>(1)
        })
        .await;

        assert!(result.is_err());
    }
}
