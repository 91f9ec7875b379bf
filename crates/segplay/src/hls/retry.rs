// Retry with exponential backoff, shared by playlist loads and segment fetches.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::FetchError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the initial attempt).
    pub max_retries: u32,
    /// Actual delay = base * 2^attempt + jitter.
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    /// Adds random jitter of [0, base_delay/2).
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // 2^attempt saturates for attempts >= 32.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exp_delay = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay);
        let capped = exp_delay.min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        // Jitter never pushes the delay past `max_delay`.
        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let jitter_limit_ms = jitter_range_ms.min(remaining_ms);
        if jitter_limit_ms == 0 {
            return capped;
        }

        let jitter_ms = rand::rng().random_range(0..jitter_limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

/// Outcome of a single attempt.
pub enum RetryAction<T> {
    Success(T),
    /// Transient failure (network, 5xx, timeout).
    Retry(FetchError),
    /// Permanent failure (4xx, cancellation).
    Fail(FetchError),
}

impl<T> From<Result<T, FetchError>> for RetryAction<T> {
    fn from(result: Result<T, FetchError>) -> Self {
        match result {
            Ok(value) => RetryAction::Success(value),
            Err(err) if err.is_retryable() => RetryAction::Retry(err),
            Err(err) => RetryAction::Fail(err),
        }
    }
}

/// Execute an async operation with retry-and-backoff.
///
/// `operation` receives the 0-indexed attempt number. `on_retry` is invoked
/// before each backoff sleep with the attempt that just failed, which lets the
/// caller report a non-fatal fault while the retry budget lasts. Exhausting
/// the budget yields [`FetchError::RetriesExhausted`].
pub async fn retry_with_backoff<F, Fut, T, R>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
    mut on_retry: R,
) -> Result<T, FetchError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
    R: FnMut(u32, &FetchError),
{
    let mut attempt = 0u32;
    loop {
        if token.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(FetchError::Cancelled),
            outcome = operation(attempt) => outcome,
        };

        match outcome {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => {
                if attempt >= policy.max_retries {
                    return Err(FetchError::RetriesExhausted {
                        attempts: attempt + 1,
                        last: Box::new(err),
                    });
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after transient error"
                );
                on_retry(attempt, &err);
                tokio::select! {
                    _ = token.cancelled() => return Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_secs(1),
            jitter: false,
        }
    }

    fn transient() -> FetchError {
        FetchError::http_status(503, "https://cdn.example/seg.ts")
    }

    #[test]
    fn delay_respects_max_cap() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            jitter: false,
        };
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(5));
    }

    #[test]
    fn delay_without_jitter_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: false,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn jitter_stays_within_half_base() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
        };
        for _ in 0..32 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay < Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn exhausts_budget_then_reports() {
        let attempts = AtomicU32::new(0);
        let mut retries_seen = Vec::new();
        let result: Result<(), _> = retry_with_backoff(
            &fast_policy(3),
            &CancellationToken::new(),
            |_| {
                attempts.fetch_add(1, Ordering::Relaxed);
                async { RetryAction::Retry(transient()) }
            },
            |attempt, _| retries_seen.push(attempt),
        )
        .await;

        // Initial attempt + 3 retries
        assert_eq!(attempts.load(Ordering::Relaxed), 4);
        assert_eq!(retries_seen, vec![0, 1, 2]);
        match result {
            Err(FetchError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, FetchError::HttpStatus { status: 503, .. }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(
            &fast_policy(3),
            &CancellationToken::new(),
            |_| {
                attempts.fetch_add(1, Ordering::Relaxed);
                async { RetryAction::from(Err(FetchError::http_status(404, "x"))) }
            },
            |_, _| {},
        )
        .await;
        assert!(matches!(result, Err(FetchError::HttpStatus { status: 404, .. })));
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failure() {
        let result = retry_with_backoff(
            &fast_policy(3),
            &CancellationToken::new(),
            |attempt| async move {
                if attempt == 0 {
                    RetryAction::Retry(transient())
                } else {
                    RetryAction::Success(7u32)
                }
            },
            |_, _| {},
        )
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let result = retry_with_backoff(
            &fast_policy(10),
            &token,
            |_| async { RetryAction::Success(1u32) },
            |_, _| {},
        )
        .await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff_sleep() {
        let token = CancellationToken::new();
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            jitter: false,
        };
        let canceller = token.clone();
        let result: Result<(), _> = retry_with_backoff(
            &policy,
            &token,
            |_| async { RetryAction::Retry(transient()) },
            move |_, _| canceller.cancel(),
        )
        .await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }
}
