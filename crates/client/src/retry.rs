//! Bounded retry with fixed or exponential backoff.
//!
//! A [`RetryPolicy`] is plain data. All per-call state (the attempt counter,
//! the last failure) lives in the frame of [`RetryPolicy::run`], so one
//! policy can drive any number of concurrent operations.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, warn};

/// How long to wait between attempts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backoff {
    /// The same delay after every failed attempt.
    Fixed(Duration),

    /// Doubling delay starting at `base`, never above `max`.
    Exponential {
        /// Delay after the first failed attempt.
        base: Duration,
        /// Upper bound for any single delay.
        max: Duration,
        /// Stretch each delay by up to 10% to spread out retrying clients.
        jitter: bool,
    },
}

/// What to do after a failed attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Decision {
    /// Try again if the budget allows.
    Retry,

    /// Give up immediately.
    Abort,
}

/// Maximum attempts plus the delay between them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,

    /// Delay schedule.
    pub backoff: Backoff,
}

/// The outcome of the last attempt of a failed operation.
#[derive(Clone, Debug, Error)]
pub enum Attempt<E>
where
    E: std::error::Error + 'static,
{
    /// The operation returned an error.
    #[error(transparent)]
    Failed(E),

    /// The operation did not finish in time.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

/// A retried operation failed for good.
#[derive(Clone, Debug, Error)]
#[error("failed after {attempts} attempt(s): {last}")]
pub struct RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Attempts made.
    pub attempts: u32,

    /// The last attempt's failure.
    #[source]
    pub last: Attempt<E>,

    /// Whether the classifier stopped retrying before the budget ran out.
    pub aborted: bool,
}

impl RetryPolicy {
    /// Retries with the same delay between attempts.
    #[must_use]
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Retries with a doubling, jittered delay capped at `max`.
    #[must_use]
    pub const fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential {
                base,
                max,
                jitter: true,
            },
        }
    }

    /// The same policy with a different attempt budget.
    #[must_use]
    pub const fn with_max_attempts(self, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: self.backoff,
        }
    }

    /// The same policy without jitter.
    #[must_use]
    pub const fn without_jitter(self) -> Self {
        match self.backoff {
            Backoff::Fixed(_) => self,
            Backoff::Exponential { base, max, .. } => Self {
                max_attempts: self.max_attempts,
                backoff: Backoff::Exponential {
                    base,
                    max,
                    jitter: false,
                },
            },
        }
    }

    const fn budget(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max, .. } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor).min(max)
            }
        }
    }

    /// Wait before the attempt following attempt number `attempt` (1-based),
    /// or `None` once the budget is spent.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.budget() {
            return None;
        }

        let delay = self.base_delay(attempt);

        Some(match self.backoff {
            Backoff::Exponential {
                jitter: true, max, ..
            } => delay.mul_f64(fastrand::f64().mul_add(0.1, 1.0)).min(max),
            _ => delay,
        })
    }

    /// Upper bound on the total time spent waiting between attempts.
    #[must_use]
    pub fn max_total_delay(&self) -> Duration {
        (1..self.budget())
            .map(|attempt| match self.backoff {
                Backoff::Exponential {
                    jitter: true, max, ..
                } => self.base_delay(attempt).mul_f64(1.1).min(max),
                _ => self.base_delay(attempt),
            })
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    /// Runs `operation` until it succeeds, `classify` aborts, or the budget
    /// is spent. Each attempt is bounded by `timeout`; a timed out attempt
    /// counts as a retryable failure.
    ///
    /// `operation` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns a [`RetryError`] describing the last attempt.
    pub async fn run<T, E, F, Fut, C>(
        &self,
        operation_name: &str,
        timeout: Duration,
        classify: C,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> Decision,
    {
        let max_attempts = self.budget();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let last = match tokio::time::timeout(timeout, operation(attempt)).await {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        debug!(
                            operation = operation_name,
                            attempts = attempt,
                            "operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    if classify(&e) == Decision::Abort {
                        debug!(
                            operation = operation_name,
                            attempt,
                            error = %e,
                            "operation failed with non-retriable error"
                        );
                        return Err(RetryError {
                            attempts: attempt,
                            last: Attempt::Failed(e),
                            aborted: true,
                        });
                    }
                    Attempt::Failed(e)
                }
                Err(_) => Attempt::TimedOut(timeout),
            };

            let Some(delay) = self.delay_after(attempt) else {
                error!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %last,
                    "operation failed after maximum attempts"
                );
                return Err(RetryError {
                    attempts: attempt,
                    last,
                    aborted: false,
                });
            };

            warn!(
                operation = operation_name,
                attempt,
                max_attempts,
                delay = ?delay,
                error = %last,
                "operation failed, retrying"
            );

            tokio::time::sleep(delay).await;
        }
    }
}

impl<E> Attempt<E>
where
    E: std::error::Error + 'static,
{
    /// The operation's own error, unless the attempt timed out.
    #[must_use]
    pub const fn error(&self) -> Option<&E> {
        match self {
            Self::Failed(e) => Some(e),
            Self::TimedOut(_) => None,
        }
    }
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// The operation's last error, unless the last attempt timed out.
    #[must_use]
    pub const fn error(&self) -> Option<&E> {
        self.last.error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    #[derive(Clone, Debug, Error, PartialEq)]
    enum TestError {
        #[error("flaky")]
        Flaky,
        #[error("fatal")]
        Fatal,
    }

    fn classify(error: &TestError) -> Decision {
        match error {
            TestError::Flaky => Decision::Retry,
            TestError::Fatal => Decision::Abort,
        }
    }

    #[test]
    fn test_fixed_delays() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(5));

        assert_eq!(policy.delay_after(1), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_after(2), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_after(3), None);
        assert_eq!(policy.max_total_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_exponential_delays_double_and_cap() {
        let policy =
            RetryPolicy::exponential(6, Duration::from_millis(100), Duration::from_millis(500))
                .without_jitter();

        let delays: Vec<_> = (1..6).filter_map(|n| policy.delay_after(n)).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500),
                Duration::from_millis(500),
            ]
        );
        assert_eq!(policy.delay_after(6), None);
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let policy =
            RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_secs(5));

        for _ in 0..100 {
            let delay = policy.delay_after(2).unwrap();
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(220));
        }
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let policy = RetryPolicy::fixed(0, Duration::from_secs(1));

        assert_eq!(policy.delay_after(1), None);
        assert_eq!(policy.max_total_delay(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::fixed(5, Duration::from_secs(1));

        let result = policy
            .run("flaky", Duration::from_secs(1), classify, |_| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TestError::Flaky)
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_gives_up_within_total_delay() {
        let policy = RetryPolicy::exponential(4, Duration::from_millis(100), Duration::from_secs(1));
        let started = Instant::now();

        let err = policy
            .run("always", Duration::from_secs(1), classify, |_| async {
                Err::<(), _>(TestError::Flaky)
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 4);
        assert!(!err.aborted);
        assert_eq!(err.error(), Some(&TestError::Flaky));
        assert!(started.elapsed() <= policy.max_total_delay());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_aborts_on_fatal_error() {
        let policy = RetryPolicy::fixed(10, Duration::from_secs(5));

        let err = policy
            .run("fatal", Duration::from_secs(1), classify, |_| async {
                Err::<(), _>(TestError::Fatal)
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 1);
        assert!(err.aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_counts_timeouts_as_failures() {
        let policy = RetryPolicy::fixed(2, Duration::from_millis(10));

        let err = policy
            .run("hang", Duration::from_millis(50), classify, |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, TestError>(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 2);
        assert!(matches!(err.last, Attempt::TimedOut(_)));
    }
}
