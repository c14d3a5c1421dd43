//! # Jitter policy for retry delays.
//!
//! [`JitterPolicy`] randomizes backoff delays so that work failing together
//! (a queue backlog hitting the same broken dependency) does not retry in lockstep.
//!
//! - [`JitterPolicy::None`] exact delays
//! - [`JitterPolicy::Full`] uniform in `[0, delay]`
//! - [`JitterPolicy::Equal`] `delay/2 + uniform[0, delay/2]`
//! - [`JitterPolicy::Decorrelated`] uniform in `[base, min(prev * 3, max)]`

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Policy controlling randomization of retry delays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterPolicy {
    /// No jitter: use the exact backoff delay.
    #[default]
    None,
    /// Random delay in `[0, delay]`.
    Full,
    /// `delay/2 + random[0, delay/2]`; keeps at least half of the delay.
    Equal,
    /// Random delay in `[base, prev * 3]`, capped at `max`.
    ///
    /// Needs the extra context passed to [`apply_decorrelated`](Self::apply_decorrelated).
    Decorrelated,
}

impl JitterPolicy {
    /// Maps the `jitter: on|off` configuration switch to a policy.
    ///
    /// `true` selects [`JitterPolicy::Equal`], which never drops below half the delay.
    pub fn from_switch(on: bool) -> Self {
        if on {
            JitterPolicy::Equal
        } else {
            JitterPolicy::None
        }
    }

    /// Applies jitter to `delay`.
    ///
    /// `Decorrelated` returns `delay` unchanged here; use
    /// [`apply_decorrelated`](Self::apply_decorrelated).
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None | JitterPolicy::Decorrelated => delay,
            JitterPolicy::Full => uniform_ms(0, millis(delay)),
            JitterPolicy::Equal => {
                let half = millis(delay) / 2;
                Duration::from_millis(half) + uniform_ms(0, half)
            }
        }
    }

    /// Applies decorrelated jitter given the floor, the previous delay and the cap.
    ///
    /// Falls back to [`apply`](Self::apply) on `prev` for other policies.
    pub fn apply_decorrelated(&self, base: Duration, prev: Duration, max: Duration) -> Duration {
        if !matches!(self, JitterPolicy::Decorrelated) {
            return self.apply(prev);
        }
        let floor = millis(base);
        let ceil = millis(prev).saturating_mul(3).min(millis(max)).max(floor);
        uniform_ms(floor, ceil)
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

/// Uniform duration in `[lo, hi]` milliseconds.
fn uniform_ms(lo: u64, hi: u64) -> Duration {
    if lo >= hi {
        return Duration::from_millis(lo);
    }
    Duration::from_millis(rand::rng().random_range(lo..=hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        let d = Duration::from_millis(750);
        assert_eq!(JitterPolicy::None.apply(d), d);
    }

    #[test]
    fn full_stays_below_delay() {
        for _ in 0..200 {
            assert!(JitterPolicy::Full.apply(Duration::from_millis(400)) <= Duration::from_millis(400));
        }
    }

    #[test]
    fn equal_keeps_half() {
        for _ in 0..200 {
            let d = JitterPolicy::Equal.apply(Duration::from_millis(1000));
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn zero_delay_stays_zero() {
        assert_eq!(JitterPolicy::Full.apply(Duration::ZERO), Duration::ZERO);
        assert_eq!(JitterPolicy::Equal.apply(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn decorrelated_bounds() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(2);
        for _ in 0..200 {
            let d = JitterPolicy::Decorrelated.apply_decorrelated(base, Duration::from_millis(400), max);
            assert!(d >= base && d <= Duration::from_millis(1200));
        }
    }

    #[test]
    fn switch_maps_to_equal() {
        assert_eq!(JitterPolicy::from_switch(true), JitterPolicy::Equal);
        assert_eq!(JitterPolicy::from_switch(false), JitterPolicy::None);
    }
}
