//! # Retry policy: attempt budget plus backoff.
//!
//! `max_attempts` counts **executions**, not retries: `max_attempts = 1` means
//! "run once, never retry". After `n` failed executions the work is retried only
//! while `n < max_attempts`, waiting `backoff.next(n - 1)` first.
//!
//! ```text
//! max_attempts = 2
//!   attempt 1 ── RetryableFailure ──► 1 < 2  → retry after backoff.next(0)
//!   attempt 2 ── RetryableFailure ──► 2 < 2? no → exhausted (dead-letter / caller error / halt)
//! ```

use std::time::Duration;

use super::BackoffPolicy;

/// Attempt budget and delay schedule for retryable failures.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of executions (`>= 1`).
    pub max_attempts: u32,
    /// Delay schedule between executions.
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    /// `max_attempts = 3` with [`BackoffPolicy::default`].
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is clamped to at least 1.
    pub fn new(max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Run once, never retry.
    pub fn never() -> Self {
        Self::new(1, BackoffPolicy::default())
    }

    /// Whether work that has already executed `attempts` times may run again.
    #[inline]
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay to wait after `attempts` executions before the next one.
    #[inline]
    pub fn delay_after(&self, attempts: u32) -> Duration {
        self.backoff.next(attempts.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_counts_executions() {
        let p = RetryPolicy::new(2, BackoffPolicy::fixed(Duration::from_millis(10)));
        assert!(p.should_retry(1));
        assert!(!p.should_retry(2));
        assert!(!p.should_retry(3));
    }

    #[test]
    fn never_runs_once() {
        assert!(!RetryPolicy::never().should_retry(1));
    }

    #[test]
    fn zero_attempts_clamped() {
        assert_eq!(RetryPolicy::new(0, BackoffPolicy::default()).max_attempts, 1);
    }

    #[test]
    fn first_delay_is_base() {
        let p = RetryPolicy::new(
            5,
            BackoffPolicy::exponential(Duration::from_millis(50), Duration::from_secs(1)),
        );
        assert_eq!(p.delay_after(1), Duration::from_millis(50));
        assert_eq!(p.delay_after(2), Duration::from_millis(100));
    }
}
