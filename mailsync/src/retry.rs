//! # Retry
//!
//! Module dedicated to the failure policy shared by every network
//! and file operation of a sync. The [`RetryPolicy`] tells how many
//! times an item can be attempted, how long to wait between two
//! attempts, how long a single attempt can last and how many
//! exhausted items a batch tolerates before it fails as a whole.

use std::{
    future::IntoFuture,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Timeout};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The retry policy.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetryPolicy {
    /// The maximum number of attempts per item.
    pub max_attempts: usize,

    /// The delay before the second attempt, in milliseconds. The
    /// delay doubles after each failed attempt.
    pub backoff_ms: u64,

    /// The maximum delay between two attempts, in milliseconds.
    pub max_backoff_ms: u64,

    /// The number of exhausted items after which the whole batch
    /// fails.
    pub max_failures: usize,

    /// The maximum duration of one attempt, in milliseconds. An
    /// attempt that takes longer is considered failed.
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
            max_backoff_ms: 10_000,
            max_failures: 5,
            timeout_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Compute the delay to wait after the given failed attempt
    /// (starting from 1).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exp = attempt.saturating_sub(1).min(31) as u32;
        let ms = self.backoff_ms.saturating_mul(2u64.saturating_pow(exp));
        Duration::from_millis(ms.min(self.max_backoff_ms))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Start retrying a new item.
    pub fn start(&self) -> Retry<'_> {
        Retry {
            policy: self,
            attempts: 0,
        }
    }
}

/// The state of an item after an attempt.
#[derive(Debug)]
pub enum RetryState<T, E> {
    /// The attempt succeeded.
    Ok(T),

    /// The attempt failed, another one can be made.
    Retry(E),

    /// The attempt failed and it was the last one.
    Exhausted(E),
}

/// The retry state of one item.
#[derive(Debug)]
pub struct Retry<'a> {
    policy: &'a RetryPolicy,
    pub attempts: usize,
}

impl Retry<'_> {
    /// Bound the given attempt with the timeout of the policy.
    pub fn timeout<F: IntoFuture>(&self, f: F) -> Timeout<F::IntoFuture> {
        timeout(self.policy.timeout(), f)
    }

    /// Register the result of an attempt.
    ///
    /// Errors that cannot be fixed by retrying are reported as
    /// exhausted straight away.
    pub fn next<T, E>(&mut self, res: Result<T, E>, retryable: impl Fn(&E) -> bool) -> RetryState<T, E> {
        match res {
            Ok(output) => RetryState::Ok(output),
            Err(err) => {
                self.attempts += 1;

                if retryable(&err) && self.attempts < self.policy.max_attempts {
                    RetryState::Retry(err)
                } else {
                    RetryState::Exhausted(err)
                }
            }
        }
    }

    /// Wait for the backoff delay of the last failed attempt.
    ///
    /// Returns `false` if the token got cancelled while waiting.
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        let delay = self.policy.backoff(self.attempts);
        debug!(attempts = self.attempts, ?delay, "waiting before next attempt");
        sleep(delay, cancel).await
    }
}

/// Sleep for the given duration, unless the token gets cancelled.
///
/// Returns `false` if the token got cancelled.
pub async fn sleep(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// The failure threshold of a batch.
///
/// Shared by all the tasks of a batch. When the threshold is reached
/// the given token is cancelled, which stops the remaining items.
#[derive(Debug)]
pub struct FailureThreshold {
    max: usize,
    count: AtomicUsize,
    cancel: CancellationToken,
}

impl FailureThreshold {
    pub fn new(policy: &RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            max: policy.max_failures.max(1),
            count: AtomicUsize::new(0),
            cancel,
        }
    }

    /// Register an exhausted item.
    ///
    /// Returns `true` if this failure reached the threshold.
    pub fn record(&self) -> bool {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;

        if count == self.max {
            debug!(count, "failure threshold reached, cancelling batch");
            self.cancel.cancel();
            true
        } else {
            false
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_reached(&self) -> bool {
        self.count() >= self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(10), Duration::from_millis(10_000));
        assert_eq!(policy.backoff(200), Duration::from_millis(10_000));
    }

    #[test]
    fn retry_until_exhausted() {
        let policy = RetryPolicy::default();
        let mut retry = policy.start();
        let always = |_: &&str| true;

        assert!(matches!(retry.next::<(), _>(Err("a"), always), RetryState::Retry("a")));
        assert!(matches!(retry.next::<(), _>(Err("b"), always), RetryState::Retry("b")));
        assert!(matches!(retry.next::<(), _>(Err("c"), always), RetryState::Exhausted("c")));
        assert_eq!(retry.attempts, 3);
    }

    #[test]
    fn non_retryable_error_is_exhausted() {
        let policy = RetryPolicy::default();
        let mut retry = policy.start();

        assert!(matches!(
            retry.next::<(), _>(Err("fatal"), |_| false),
            RetryState::Exhausted("fatal")
        ));
        assert!(matches!(retry.next(Ok::<_, &str>(42), |_| true), RetryState::Ok(42)));
    }

    #[test]
    fn threshold_cancels_batch() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            max_failures: 2,
            ..Default::default()
        };
        let threshold = FailureThreshold::new(&policy, cancel.clone());

        assert!(!threshold.record());
        assert!(!cancel.is_cancelled());
        assert!(threshold.record());
        assert!(cancel.is_cancelled());
        assert!(!threshold.record());
        assert!(threshold.is_reached());
    }

    #[tokio::test]
    async fn timeout_bounds_attempts() {
        let policy = RetryPolicy {
            timeout_ms: 10,
            ..Default::default()
        };
        let retry = policy.start();

        assert!(retry.timeout(std::future::pending::<()>()).await.is_err());
        assert_eq!(retry.timeout(async { 42 }).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn sleep_is_interrupted_by_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!sleep(Duration::from_secs(60), &cancel).await);
        assert!(sleep(Duration::from_millis(1), &CancellationToken::new()).await);
    }
}
