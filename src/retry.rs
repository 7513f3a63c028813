//! Bounded retry with exponential backoff.
//!
//! Callers get a typed outcome so they can tell "try again automatically"
//! apart from "needs user action". There is deliberately no unbounded mode.

use std::time::Duration;

/// How many times to attempt an operation and how long to wait between
/// attempts. Delay doubles after each failed attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        assert!(max_attempts > 0, "retry policy needs at least one attempt");
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Backoff delay after the given zero-based failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Whether a failed attempt is worth retrying.
#[derive(Debug)]
pub enum Attempt<T, E> {
    Done(T),
    Retriable(E),
    Terminal(E),
}

/// Final outcome after the policy is exhausted.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success(T),
    /// All attempts failed with retriable errors; the last one is returned.
    Exhausted(E),
    /// A terminal failure ended the loop early.
    Terminal(E),
}

/// Run `op` under the policy. `op` receives the zero-based attempt number.
pub async fn run_with_retry<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Attempt<T, E>>,
{
    let mut last_err = None;
    for attempt in 0..policy.max_attempts {
        match op(attempt).await {
            Attempt::Done(value) => return RetryOutcome::Success(value),
            Attempt::Terminal(e) => return RetryOutcome::Terminal(e),
            Attempt::Retriable(e) => {
                last_err = Some(e);
                if attempt + 1 < policy.max_attempts {
                    tokio::time::sleep(policy.delay_after(attempt)).await;
                }
            }
        }
    }
    // max_attempts > 0, so at least one attempt ran and set last_err
    RetryOutcome::Exhausted(last_err.expect("at least one attempt"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_first_attempt() {
        let outcome: RetryOutcome<i32, &str> =
            run_with_retry(RetryPolicy::default(), |_| async { Attempt::Done(42) }).await;
        assert!(matches!(outcome, RetryOutcome::Success(42)));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<u32, &str> =
            run_with_retry(RetryPolicy::default(), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Attempt::Retriable("busy")
                    } else {
                        Attempt::Done(attempt)
                    }
                }
            })
            .await;
        assert!(matches!(outcome, RetryOutcome::Success(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<(), &str> =
            run_with_retry(RetryPolicy::new(3, Duration::from_millis(10)), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Attempt::Retriable("busy") }
            })
            .await;
        assert!(matches!(outcome, RetryOutcome::Exhausted("busy")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_stops_immediately() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<(), &str> =
            run_with_retry(RetryPolicy::default(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Attempt::Terminal("declined") }
            })
            .await;
        assert!(matches!(outcome, RetryOutcome::Terminal("declined")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        assert_eq!(policy.delay_after(0), Duration::from_millis(100));
        assert_eq!(policy.delay_after(1), Duration::from_millis(200));
        assert_eq!(policy.delay_after(2), Duration::from_millis(400));
    }
}
