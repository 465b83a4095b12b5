//! Bounded retry with linearly increasing backoff.
//!
//! The policy is a plain value so it can be tested on its own; the one
//! helper, [`retry_with_policy`], is the only place that sleeps between
//! attempts.

use std::future::Future;
use std::time::Duration;

/// How many times to retry and how long to wait in between.
///
/// Retry *k* (1-based) waits `k * backoff_step`, so the default policy
/// waits 2 s, 4 s, then 6 s before giving up after the fourth attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_step: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_step: Duration) -> Self {
        Self {
            max_retries,
            backoff_step,
        }
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_before(&self, retry: u32) -> Duration {
        self.backoff_step * retry
    }
}

/// The last error once every attempt allowed by the policy has failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RetriesExhausted<E> {
    pub attempts: u32,
    pub last: E,
}

/// Runs `op` until it succeeds, the error is not retryable, or the policy
/// runs out of retries.
///
/// `op` receives the 0-based attempt number. `on_failure` is called for
/// every failed attempt with that number and the error, before any backoff
/// sleep, so callers can log each failure once.
pub async fn retry_with_policy<T, E, F, Fut>(
    policy: &RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    mut on_failure: impl FnMut(u32, &E),
    mut op: F,
) -> Result<T, RetriesExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                on_failure(attempt, &err);
                let retry = attempt + 1;
                if retry > policy.max_retries || !is_retryable(&err) {
                    return Err(RetriesExhausted {
                        attempts: retry,
                        last: err,
                    });
                }
                tokio::time::sleep(policy.delay_before(retry)).await;
                attempt = retry;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tokio::time::Instant;

    #[test]
    fn test_default_policy_matches_dashboard_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.delay_before(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_before(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_before(3), Duration::from_millis(6000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_then_success_waits_2_4_6_seconds() {
        let policy = RetryPolicy::default();
        let started = Instant::now();
        let calls = RefCell::new(Vec::new());

        let result = retry_with_policy(
            &policy,
            |_: &String| true,
            |_, _| {},
            |attempt| {
                calls.borrow_mut().push(started.elapsed());
                async move {
                    if attempt < 3 {
                        Err(format!("attempt {} failed", attempt))
                    } else {
                        Ok(attempt)
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Ok(3));
        let calls = calls.into_inner();
        let gaps: Vec<_> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(2000),
                Duration::from_millis(4000),
                Duration::from_millis(6000),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy::default();
        let mut failures = Vec::new();

        let result: Result<(), _> = retry_with_policy(
            &policy,
            |_: &&str| true,
            |attempt, _| failures.push(attempt),
            |_| async { Err("down") },
        )
        .await;

        assert_eq!(
            result,
            Err(RetriesExhausted {
                attempts: 4,
                last: "down"
            })
        );
        assert_eq!(failures, vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_immediately() {
        let policy = RetryPolicy::default();
        let started = Instant::now();

        let result: Result<(), _> =
            retry_with_policy(&policy, |_: &&str| false, |_, _| {}, |_| async { Err("fatal") })
                .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
