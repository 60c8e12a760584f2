//! Retry with exponential backoff for transient network failures
//!
//! ```rust,ignore
//! let policy = RetryPolicy::exponential(3, Duration::from_millis(500));
//! let records = policy.run("fetch_costs", || source.fetch_costs(window, granularity)).await?;
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{DeliveryError, Error};

/// Errors that know whether another attempt may succeed
pub trait Retryable: Display {
    /// Whether the failure is transient (timeouts, throttling, 5xx)
    fn is_transient(&self) -> bool;

    /// Minimum wait requested by the remote side
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for Error {
    fn is_transient(&self) -> bool {
        Error::is_transient(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Delivery(e) => e.retry_after(),
            _ => None,
        }
    }
}

impl Retryable for DeliveryError {
    fn is_transient(&self) -> bool {
        DeliveryError::is_transient(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            DeliveryError::RateLimited {
                retry_after_secs: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

/// Retry policy configuration
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: usize,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor between attempts
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(500))
    }
}

impl RetryPolicy {
    /// Exponential backoff starting at `initial_delay`, doubling, capped at 60s
    pub fn exponential(max_attempts: usize, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }

    /// Delay before attempt `attempt + 1`
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(millis.min(self.max_delay.as_millis() as f64) as u64)
    }

    /// Run `f`, retrying transient failures
    pub async fn run<F, Fut, T, E>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    warn!(operation, attempts = attempt, error = %e, "All attempts exhausted");
                    return Err(e);
                }
                Err(e) => {
                    let delay = e
                        .retry_after()
                        .map_or_else(|| self.delay_for(attempt), |hint| hint.max(self.delay_for(attempt)))
                        .min(self.max_delay);
                    warn!(
                        operation,
                        attempt,
                        max = self.max_attempts,
                        error = %e,
                        delay = %humantime::format_duration(delay),
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::exponential(10, Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(20), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::default();

        let result: Result<u32, Error> = policy
            .run("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::transient("throttled"))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::default();

        let result: Result<(), DeliveryError> = policy
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DeliveryError::Timeout)
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_fast() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::default();

        let result: Result<(), Error> = policy
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::retrieval("access denied"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rate_limit_hint() {
        let e = DeliveryError::RateLimited {
            retry_after_secs: Some(5),
        };
        assert_eq!(Retryable::retry_after(&e), Some(Duration::from_secs(5)));
    }
}
