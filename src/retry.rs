//! Retry with pluggable backoff, shared by the extract and load stages.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Computes how long to wait after a failed attempt (1-based) before the next one.
pub trait Backoff {
    fn delay(&self, attempt: u32) -> Duration;
}

/// `unit * 2^(attempt - 1 + first_exponent)`.
///
/// With a one-second unit, `first_exponent = 0` waits 1s, 2s, 4s... and
/// `first_exponent = 1` waits 2s, 4s, 8s...
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub unit: Duration,
    pub first_exponent: u32,
}

impl ExponentialBackoff {
    pub fn seconds(first_exponent: u32) -> Self {
        Self {
            unit: Duration::from_secs(1),
            first_exponent,
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) + self.first_exponent;
        self.unit * 2u32.saturating_pow(exponent)
    }
}

impl<F> Backoff for F
where
    F: Fn(u32) -> Duration,
{
    fn delay(&self, attempt: u32) -> Duration {
        self(attempt)
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy<B> {
    pub max_attempts: u32,
    pub backoff: B,
}

impl<B: Backoff> RetryPolicy<B> {
    pub fn new(max_attempts: u32, backoff: B) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }
}

/// Runs `operation` until it succeeds or `policy.max_attempts` calls have failed.
///
/// `operation` receives the 1-based attempt number. Only the final attempt's
/// error is returned. A policy with `max_attempts == 0` still makes one call.
pub async fn with_retry<T, E, B, F, Fut>(policy: &RetryPolicy<B>, mut operation: F) -> Result<T, E>
where
    B: Backoff,
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                let delay = policy.backoff.delay(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn no_wait() -> RetryPolicy<ExponentialBackoff> {
        RetryPolicy::new(
            3,
            ExponentialBackoff {
                unit: Duration::ZERO,
                first_exponent: 0,
            },
        )
    }

    #[test]
    fn test_exponential_delays_from_zero() {
        let b = ExponentialBackoff::seconds(0);
        assert_eq!(b.delay(1), Duration::from_secs(1));
        assert_eq!(b.delay(2), Duration::from_secs(2));
        assert_eq!(b.delay(3), Duration::from_secs(4));
    }

    #[test]
    fn test_exponential_delays_from_one() {
        let b = ExponentialBackoff::seconds(1);
        assert_eq!(b.delay(1), Duration::from_secs(2));
        assert_eq!(b.delay(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_returns_first_success() {
        let calls = Cell::new(0);
        let result: Result<u32, String> = with_retry(&no_wait(), |attempt| {
            calls.set(calls.get() + 1);
            async move {
                if attempt < 2 {
                    Err(format!("boom {attempt}"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_returns_last_error() {
        let calls = Cell::new(0);
        let result: Result<(), String> = with_retry(&no_wait(), |attempt| {
            calls.set(calls.get() + 1);
            async move { Err(format!("boom {attempt}")) }
        })
        .await;

        assert_eq!(result, Err("boom 3".to_string()));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_closure_backoff_is_consulted_between_attempts_only() {
        let seen = std::sync::Mutex::new(Vec::new());
        let policy = RetryPolicy::new(3, |attempt: u32| {
            seen.lock().unwrap().push(attempt);
            Duration::ZERO
        });

        let _: Result<(), &str> = with_retry(&policy, |_| async { Err("nope") }).await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }
}
