//! Retry logic with configurable backoff for assignment-store calls.

use std::future::Future;
use std::time::Duration;

use delib_types::{DelibError, Result};

/// How long to wait before asking the store again.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffPolicy {
    Fixed(Duration),
    /// `base * 2^attempt`, never more than `max`.
    Exponential { base: Duration, max: Duration },
    None,
}

impl BackoffPolicy {
    /// Delay after the failed attempt `attempt` (0 = first call).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max } => {
                let factor = 2u64.saturating_pow(attempt as u32);
                let millis = (base.as_millis() as u64).saturating_mul(factor);
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_millis(50),
            max: Duration::from_secs(2),
        }
    }
}

/// Call `f` up to `max_retries + 1` times, sleeping per `policy` after each
/// retryable failure.
///
/// Non-retryable errors are returned immediately. When every attempt fails
/// with a retryable error the result is
/// [`DelibError::RetriesExhausted`]; the resolution is abandoned rather than
/// guessed.
pub async fn execute_with_retry<F, Fut, T>(
    f: F,
    max_retries: usize,
    policy: &BackoffPolicy,
    variable: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 0..=max_retries {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    variable = %variable,
                    attempt,
                    delay_ms = %delay.as_millis(),
                    error = %e,
                    "Assignment store error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    variable = %variable,
                    attempt,
                    error = %e,
                    "Assignment store still failing, giving up"
                );
            }
            Err(e) => return Err(e),
        }
    }
    Err(DelibError::RetriesExhausted {
        attempts: max_retries + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn unavailable() -> DelibError {
        DelibError::StoreUnavailable {
            message: "connection reset".into(),
        }
    }

    /// Runs `execute_with_retry` over a call that fails with `error()` for the
    /// first `failures` calls. Returns the result and the number of calls.
    async fn run_failing(
        failures: usize,
        error: fn() -> DelibError,
        max_retries: usize,
    ) -> (Result<&'static str>, usize) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let result = execute_with_retry(
            || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < failures {
                        Err(error())
                    } else {
                        Ok("treatment")
                    }
                }
            },
            max_retries,
            &BackoffPolicy::None,
            "arm",
        )
        .await;
        (result, calls.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn first_call_succeeds() {
        let (result, calls) = run_failing(0, unavailable, 3).await;
        assert_eq!(result.unwrap(), "treatment");
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let (result, calls) = run_failing(1, unavailable, 3).await;
        assert_eq!(result.unwrap(), "treatment");
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let (result, calls) = run_failing(usize::MAX, unavailable, 2).await;
        assert!(matches!(result, Err(DelibError::RetriesExhausted { attempts: 3 })));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn terminal_error_is_not_retried() {
        let (result, calls) = run_failing(
            usize::MAX,
            || DelibError::invalid_config("arm", "needs at least 2 values"),
            5,
        )
        .await;
        assert!(matches!(result, Err(DelibError::InvalidConfig { .. })));
        assert_eq!(calls, 1);
    }

    #[test]
    fn fixed_delay_is_constant() {
        let policy = BackoffPolicy::Fixed(Duration::from_millis(250));
        assert!((0..6).all(|a| policy.delay_for_attempt(a) == Duration::from_millis(250)));
        assert_eq!(BackoffPolicy::None.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn default_backoff_doubles_up_to_two_seconds() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u128> = (0..7).map(|a| policy.delay_for_attempt(a).as_millis()).collect();
        assert_eq!(delays, vec![50, 100, 200, 400, 800, 1600, 2000]);
        assert_eq!(policy.delay_for_attempt(100), Duration::from_secs(2));
    }
}
