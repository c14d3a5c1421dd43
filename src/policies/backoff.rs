//! # Backoff policy for retrying work.
//!
//! [`BackoffPolicy`] turns an attempt number into a delay before the next attempt.
//!
//! - [`BackoffStrategy::Fixed`]: every retry waits `base`.
//! - [`BackoffStrategy::Exponential`]: retry `n` (0-indexed) waits `base × factor^n`.
//!
//! Both are clamped to `max` before jitter is applied. The base delay is derived
//! purely from the attempt number, so jitter output never feeds back into later
//! delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use minix_dispatch::{BackoffPolicy, BackoffStrategy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     strategy: BackoffStrategy::Exponential,
//!     base: Duration::from_millis(100),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(100));
//! assert_eq!(backoff.next(1), Duration::from_millis(200));
//! assert_eq!(backoff.next(10), Duration::from_secs(10));
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Growth shape of retry delays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Constant delay of `base`.
    Fixed,
    /// `base × factor^attempt`.
    #[default]
    Exponential,
}

/// Retry backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Fixed or exponential growth.
    pub strategy: BackoffStrategy,
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Multiplicative growth factor for [`BackoffStrategy::Exponential`] (`>= 1.0`).
    pub factor: f64,
    /// Jitter applied after clamping.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Exponential, `base = 100ms`, `factor = 2.0`, `max = 30s`, no jitter.
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Constant-delay policy without jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            base: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Exponential policy (`factor = 2.0`) without jitter.
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base,
            max,
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Returns a copy with the given jitter.
    pub fn with_jitter(mut self, jitter: JitterPolicy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Computes the delay before retry number `attempt` (0-indexed).
    ///
    /// ### Notes
    /// - Overflowing or non-finite intermediate values clamp to `max`.
    /// - `base > max` yields `max`.
    pub fn next(&self, attempt: u32) -> Duration {
        let base = self.unjittered(attempt);
        match self.jitter {
            JitterPolicy::Decorrelated => {
                self.jitter
                    .apply_decorrelated(self.base.min(self.max), base, self.max)
            }
            other => other.apply(base),
        }
    }

    fn unjittered(&self, attempt: u32) -> Duration {
        let exp = match self.strategy {
            BackoffStrategy::Fixed => 0,
            BackoffStrategy::Exponential => attempt.min(i32::MAX as u32) as i32,
        };
        let secs = self.base.as_secs_f64() * self.factor.powi(exp);
        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn exp(base_ms: u64, max_ms: u64) -> BackoffPolicy {
        BackoffPolicy::exponential(Duration::from_millis(base_ms), Duration::from_millis(max_ms))
    }

    #[test]
    fn exponential_doubles() {
        let p = exp(100, 30_000);
        assert_eq!(p.next(0), Duration::from_millis(100));
        assert_eq!(p.next(1), Duration::from_millis(200));
        assert_eq!(p.next(2), Duration::from_millis(400));
        assert_eq!(p.next(4), Duration::from_millis(1600));
    }

    #[test]
    fn fixed_ignores_attempt() {
        let p = BackoffPolicy::fixed(Duration::from_millis(250));
        for attempt in 0..8 {
            assert_eq!(p.next(attempt), Duration::from_millis(250));
        }
    }

    #[test]
    fn base_above_max_clamps() {
        let mut p = exp(10_000, 5_000);
        assert_eq!(p.next(0), Duration::from_millis(5_000));
        p.strategy = BackoffStrategy::Fixed;
        assert_eq!(p.next(3), Duration::from_millis(5_000));
    }

    #[test]
    fn overflow_clamps_to_max() {
        assert_eq!(exp(100, 10_000).next(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn equal_jitter_within_half_and_base() {
        let p = exp(100, 30_000).with_jitter(JitterPolicy::Equal);
        for attempt in 0..12 {
            let base = (100u64 << attempt).min(30_000);
            let d = p.next(attempt);
            assert!(d >= Duration::from_millis(base / 2), "attempt {attempt}: {d:?}");
            assert!(d <= Duration::from_millis(base), "attempt {attempt}: {d:?}");
        }
    }

    proptest! {
        #[test]
        fn never_exceeds_max(
            base_ms in 0u64..5_000,
            max_ms in 1u64..60_000,
            factor in 1.0f64..8.0,
            attempt in 0u32..200,
            jitter in prop_oneof![
                Just(JitterPolicy::None),
                Just(JitterPolicy::Full),
                Just(JitterPolicy::Equal),
                Just(JitterPolicy::Decorrelated),
            ],
        ) {
            let p = BackoffPolicy {
                strategy: BackoffStrategy::Exponential,
                base: Duration::from_millis(base_ms),
                max: Duration::from_millis(max_ms),
                factor,
                jitter,
            };
            prop_assert!(p.next(attempt) <= Duration::from_millis(max_ms));
        }
    }
}
