// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! [`BackoffPolicy::delay_after`] is a pure function: given the attempt that
//! just failed, it says how long to wait before the next one, or that the
//! budget is spent. [`retry`] drives an async operation through it.
//!
//! # Example
//!
//! ```
//! use db_gate::{Backoff, BackoffPolicy};
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::default(); // 3 attempts, 1s base, x2
//! assert_eq!(policy.delay_after(1), Backoff::Retry(Duration::from_secs(1)));
//! assert_eq!(policy.delay_after(2), Backoff::Retry(Duration::from_secs(2)));
//! assert_eq!(policy.delay_after(3), Backoff::Exhausted);
//! assert_eq!(policy.total_budget(), Duration::from_secs(3));
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Wait this long, then try again
    Retry(Duration),
    /// No attempts left
    Exhausted,
}

/// Geometric backoff: `base_delay * multiplier^(attempt-1)`, optionally capped.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: None,
        }
    }
}

impl BackoffPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier,
            max_delay: None,
        }
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Attempts actually made: a zero budget still gets one try.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after `attempt` (1-indexed) fails.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Backoff {
        if attempt >= self.attempts() {
            return Backoff::Exhausted;
        }
        // Below 1.0 the sequence would shrink; NaN collapses to 1.0 too.
        let factor = if self.multiplier >= 1.0 { self.multiplier } else { 1.0 };
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay = if exponent == 0 || factor == 1.0 {
            self.base_delay
        } else {
            let secs = self.base_delay.as_secs_f64() * factor.powi(exponent);
            Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
        };
        Backoff::Retry(match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        })
    }

    /// Sum of every sleep before exhaustion: the worst-case time a caller
    /// spends in backoff (connect and probe time excluded).
    #[must_use]
    pub fn total_budget(&self) -> Duration {
        (1..self.attempts())
            .filter_map(|attempt| match self.delay_after(attempt) {
                Backoff::Retry(d) => Some(d),
                Backoff::Exhausted => None,
            })
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Run `operation` until it succeeds or the policy is exhausted.
///
/// Sleeps between attempts only; never after the last one. Returns the
/// final error on exhaustion.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    policy: &BackoffPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(val) => {
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "Operation succeeded after retries");
                }
                return Ok(val);
            }
            Err(err) => match policy.delay_after(attempt) {
                Backoff::Retry(delay) => {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        error = %err,
                        "Operation failed. Retrying in {:?}...",
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Backoff::Exhausted => {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        error = %err,
                        "Operation failed, no attempts left"
                    );
                    return Err(err);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    fn fast() -> BackoffPolicy {
        BackoffPolicy::new(3, Duration::from_millis(1), 2.0)
    }

    #[test]
    fn test_default_matches_documented_defaults() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.multiplier, 2.0);
        assert!(policy.max_delay.is_none());
    }

    #[test]
    fn test_delay_sequence_is_geometric() {
        let policy = BackoffPolicy::new(5, Duration::from_millis(100), 2.0);
        assert_eq!(policy.delay_after(1), Backoff::Retry(Duration::from_millis(100)));
        assert_eq!(policy.delay_after(2), Backoff::Retry(Duration::from_millis(200)));
        assert_eq!(policy.delay_after(3), Backoff::Retry(Duration::from_millis(400)));
        assert_eq!(policy.delay_after(4), Backoff::Retry(Duration::from_millis(800)));
        assert_eq!(policy.delay_after(5), Backoff::Exhausted);
        assert_eq!(policy.delay_after(6), Backoff::Exhausted);
    }

    #[test]
    fn test_delay_caps_at_max() {
        let policy = BackoffPolicy::new(5, Duration::from_secs(1), 10.0)
            .with_max_delay(Duration::from_secs(5));
        assert_eq!(policy.delay_after(1), Backoff::Retry(Duration::from_secs(1)));
        assert_eq!(policy.delay_after(2), Backoff::Retry(Duration::from_secs(5)));
        assert_eq!(policy.delay_after(4), Backoff::Retry(Duration::from_secs(5)));
    }

    #[test]
    fn test_shrinking_multiplier_is_flattened() {
        let policy = BackoffPolicy::new(4, Duration::from_secs(2), 0.5);
        assert_eq!(policy.delay_after(1), Backoff::Retry(Duration::from_secs(2)));
        assert_eq!(policy.delay_after(3), Backoff::Retry(Duration::from_secs(2)));
    }

    #[test]
    fn test_huge_exponent_saturates() {
        let policy = BackoffPolicy::new(u32::MAX, Duration::from_secs(1), 1e10);
        assert_eq!(policy.delay_after(1000), Backoff::Retry(Duration::MAX));
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let policy = BackoffPolicy::new(0, Duration::from_secs(1), 2.0);
        assert_eq!(policy.attempts(), 1);
        assert_eq!(policy.delay_after(1), Backoff::Exhausted);
        assert_eq!(policy.total_budget(), Duration::ZERO);
    }

    #[test]
    fn test_total_budget_excludes_final_attempt() {
        assert_eq!(BackoffPolicy::default().total_budget(), Duration::from_secs(3));
        let policy = BackoffPolicy::new(4, Duration::from_millis(100), 3.0);
        assert_eq!(policy.total_budget(), Duration::from_millis(100 + 300 + 900));
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let result: Result<i32, TestError> = retry("test_op", &fast(), || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry("test_op", &fast(), || {
            let a = attempts_clone.clone();
            async move {
                let count = a.fetch_add(1, Ordering::SeqCst) + 1;
                if count < 3 {
                    Err(TestError(format!("fail {}", count)))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, TestError> = retry("test_op", &fast(), || {
            let a = attempts_clone.clone();
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err(TestError("always fail".to_string()))
            }
        })
        .await;

        assert!(result.unwrap_err().0.contains("always fail"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_sleeps_only_between_attempts() {
        let start = tokio::time::Instant::now();
        let result: Result<(), TestError> = retry("test_op", &BackoffPolicy::default(), || async {
            Err(TestError("down".into()))
        })
        .await;

        assert!(result.is_err());
        // 1s after attempt 1, 2s after attempt 2, nothing after attempt 3.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(3050), "elapsed {:?}", elapsed);
    }
}
