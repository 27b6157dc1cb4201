//! Bounded retry with exponential backoff, and caller deadlines.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::error::{RagError, Result};

/// Retry behaviour for calls to external providers.
///
/// Every attempt is bounded by `attempt_timeout`. A timed out attempt counts
/// as a transient failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first. Values below 1 act as 1.
    pub max_attempts: u32,
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Cap on the delay between attempts.
    pub max_backoff: Duration,
    /// Backoff multiplier (delay *= multiplier after each retry).
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy with `max_attempts` attempts and default timings.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts, ..Default::default() }
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Set the initial backoff delay.
    #[must_use]
    pub fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    /// Set the maximum backoff delay.
    #[must_use]
    pub fn with_max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = delay;
        self
    }

    /// Set the backoff multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Check that the policy can be executed.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfiguration`] if `attempt_timeout` is zero
    /// or `multiplier` is not a finite number of at least `1.0`.
    pub fn validate(&self) -> Result<()> {
        if self.attempt_timeout.is_zero() {
            return Err(RagError::InvalidConfiguration(
                "attempt_timeout must be greater than zero".to_string(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(RagError::InvalidConfiguration(format!(
                "backoff multiplier ({}) must be a finite number >= 1",
                self.multiplier
            )));
        }
        Ok(())
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.multiplier.max(1.0))
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// runs out of attempts. The last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    let mut delay = policy.initial_backoff;

    loop {
        attempt += 1;

        let outcome = match timeout(policy.attempt_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(RagError::Timeout {
                operation: operation.to_string(),
                timeout_ms: policy.attempt_timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && err.is_retryable() => {
                warn!(operation, attempt, max_attempts, error = %err, "transient failure, retrying");
                sleep(delay).await;
                delay = policy.next_delay(delay);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Wait at most `deadline` for `work`.
///
/// The work runs on its own task and is not cancelled when the deadline
/// passes; only the wait is abandoned and [`RagError::Timeout`] returned.
pub async fn run_with_deadline<T, Fut>(operation: &str, deadline: Duration, work: Fut) -> Result<T>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let handle = tokio::spawn(work);
    match timeout(deadline, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => {
            Err(RagError::Pipeline(format!("{operation} task failed: {join_error}")))
        }
        Err(_) => {
            warn!(operation, deadline_ms = deadline.as_millis() as u64, "caller deadline elapsed");
            Err(RagError::Timeout {
                operation: operation.to_string(),
                timeout_ms: deadline.as_millis() as u64,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts)
            .with_initial_backoff(Duration::from_millis(1))
            .with_attempt_timeout(Duration::from_millis(50))
    }

    fn unavailable() -> RagError {
        RagError::EmbeddingUnavailable { provider: "mock".into(), message: "503".into() }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), "embed", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 { Err(unavailable()) } else { Ok(7) }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(3), "embed", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(unavailable())
        })
        .await;
        assert!(matches!(result, Err(RagError::EmbeddingUnavailable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_contract_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(5), "embed", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RagError::DimensionMismatch { expected: 3, actual: 2 })
        })
        .await;
        assert!(matches!(result, Err(RagError::DimensionMismatch { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out_and_are_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(2), "embed", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(RagError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::default().with_max_backoff(Duration::from_millis(300));
        let next = policy.next_delay(Duration::from_millis(200));
        assert_eq!(next, Duration::from_millis(300));
    }

    #[test]
    fn huge_multiplier_saturates_at_max_backoff() {
        let policy = RetryPolicy::default().with_multiplier(1e300);
        assert_eq!(policy.next_delay(Duration::from_secs(1)), policy.max_backoff);
        let policy = RetryPolicy::default().with_multiplier(f64::INFINITY);
        assert_eq!(policy.next_delay(Duration::from_secs(1)), policy.max_backoff);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_huge_multiplier_do_not_panic() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(4).with_multiplier(1e300);
        let result: Result<()> = with_retry(&policy, "embed", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(unavailable())
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn validate_rejects_unusable_policies() {
        RetryPolicy::default().validate().unwrap();
        assert!(RetryPolicy::default().with_attempt_timeout(Duration::ZERO).validate().is_err());
        assert!(RetryPolicy::default().with_multiplier(f64::NAN).validate().is_err());
        assert!(RetryPolicy::default().with_multiplier(f64::INFINITY).validate().is_err());
        assert!(RetryPolicy::default().with_multiplier(0.5).validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_abandons_wait_but_not_work() {
        let finished = Arc::new(AtomicU32::new(0));
        let flag = finished.clone();
        let result = run_with_deadline("ingest", Duration::from_millis(10), async move {
            sleep(Duration::from_millis(100)).await;
            flag.store(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(RagError::Timeout { timeout_ms: 10, .. })));

        sleep(Duration::from_millis(200)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deadline_passes_through_results() {
        let value = run_with_deadline("query", Duration::from_secs(1), async { Ok(5) }).await;
        assert_eq!(value.unwrap(), 5);
    }
}
