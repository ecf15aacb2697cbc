//! Retry with backoff for transient failures.
//!
//! One policy type covers every call site: the catalog API client retries a
//! few times with exponential growth, the broker connector retries for a very
//! long time with a fixed delay.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

/// Backoff policy: at most `max_attempts` calls, waiting
/// `base_delay * factor^n` after the n-th failure (0-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
}

impl RetryPolicy {
    /// Policy with a constant delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            factor: 1,
        }
    }

    /// Policy whose delay is multiplied by `factor` after each failure.
    pub fn exponential(max_attempts: u32, base_delay: Duration, factor: u32) -> Self {
        Self {
            max_attempts,
            base_delay,
            factor,
        }
    }

    /// Delay to wait after the `failure`-th failed attempt (0-based).
    pub fn delay_for(&self, failure: u32) -> Duration {
        let multiplier = self.factor.max(1).saturating_pow(failure);
        self.base_delay.saturating_mul(multiplier)
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempts
    /// are used up.
    ///
    /// The operation receives the 0-based attempt number. Errors for which
    /// `is_transient` returns false are returned immediately.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        operation: &str,
        mut op: F,
        is_transient: P,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let is_last = attempt + 1 >= max_attempts;
                    if is_last || !is_transient(&e) {
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = %operation,
                        attempt = attempt + 1,
                        max_attempts = max_attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_delay_for_exponential() {
        let policy = RetryPolicy::exponential(3, Duration::from_secs(4), 2);
        assert_eq!(policy.delay_for(0), Duration::from_secs(4));
        assert_eq!(policy.delay_for(1), Duration::from_secs(8));
        assert_eq!(policy.delay_for(2), Duration::from_secs(16));
    }

    #[test]
    fn test_delay_for_fixed() {
        let policy = RetryPolicy::fixed(3000, Duration::from_secs(30));
        assert_eq!(policy.delay_for(0), Duration::from_secs(30));
        assert_eq!(policy.delay_for(2999), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors_until_success() {
        let policy = RetryPolicy::exponential(3, Duration::from_secs(4), 2);
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<u32, String> = policy
            .run(
                "test",
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 2 {
                            Err("timeout".to_string())
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                |_| true,
            )
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = policy
            .run(
                "test",
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("connection refused".to_string()) }
                },
                |_| true,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let policy = RetryPolicy::fixed(5, Duration::from_secs(1));
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = policy
            .run(
                "test",
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("404".to_string()) }
                },
                |e| e != "404",
            )
            .await;

        assert_eq!(result, Err("404".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
