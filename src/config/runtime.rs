//! # Runtime-wide configuration.
//!
//! ## Sentinel values
//! - `request_limit`, `queue_limit`, `stream_limit` = `0` → unlimited (source never pauses)
//! - `defaults.timeout = None` → no handler timeout

use std::collections::HashMap;
use std::time::Duration;

use crate::error::ConfigError;
use crate::policies::ExhaustionPolicy;
use crate::registry::ExecutionPolicy;
use crate::work::SourceKind;

/// Global configuration for the dispatch runtime.
///
/// ## Field semantics
/// - `grace`: maximum wait for source loops and executions to stop on shutdown
/// - `cancel_grace`: how long a timed-out handler may keep its capacity after
///   its cancellation signal fired; the execution is aborted afterwards
/// - `*_limit`: in-flight envelopes per source before ingestion pauses (`0` = unlimited)
/// - `queue_poll_interval`: sleep between pulls when the queue is empty
/// - `stream_batch_size`: maximum records per stream poll (min 1)
/// - `partition_buffer`: records buffered per stream partition worker, and the
///   backlog size at which a partition is paused (min 1)
/// - `on_stream_retry_exhaustion`: dead-letter and advance, or halt the partition
/// - `defaults`: execution policy for work types without an override
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum time to wait for graceful shutdown before giving up.
    pub grace: Duration,
    /// Capacity of the event bus ring buffer (min 1).
    pub bus_capacity: usize,
    /// Bound on capacity reclamation after a handler timeout.
    pub cancel_grace: Duration,
    /// In-flight request limit (`0` = unlimited).
    pub request_limit: usize,
    /// In-flight queue message limit (`0` = unlimited).
    pub queue_limit: usize,
    /// In-flight stream record limit (`0` = unlimited).
    pub stream_limit: usize,
    /// Idle sleep after an empty (or failed) queue pull or stream poll.
    pub queue_poll_interval: Duration,
    /// Maximum records fetched per stream poll.
    pub stream_batch_size: usize,
    /// Per-partition buffer between the stream poller and its partition worker.
    /// A backlog of this many records pauses the partition on the backend.
    pub partition_buffer: usize,
    /// What a stream partition does once a record exhausts its retries.
    pub on_stream_retry_exhaustion: ExhaustionPolicy,
    /// Policy for work types without an explicit override.
    pub defaults: ExecutionPolicy,
    /// Per-work-type policies. At build time these replace the policy a work
    /// type was registered with.
    pub overrides: HashMap<String, ExecutionPolicy>,
}

impl Config {
    /// Returns the in-flight limit of a source as an `Option` (`None` = unlimited).
    #[inline]
    pub fn source_limit(&self, kind: SourceKind) -> Option<usize> {
        let n = match kind {
            SourceKind::Request => self.request_limit,
            SourceKind::Queue => self.queue_limit,
            SourceKind::Stream => self.stream_limit,
        };
        (n > 0).then_some(n)
    }

    /// Execution policy of `work_type`: its override, else [`Config::defaults`].
    ///
    /// # Example
    /// ```
    /// use minix_dispatch::{Config, ExecutionPolicy};
    ///
    /// let mut cfg = Config::default();
    /// cfg.overrides.insert("resize_image".into(), ExecutionPolicy::default().with_max_concurrency(2));
    ///
    /// assert_eq!(cfg.policy_for("resize_image").max_concurrency, 2);
    /// assert_eq!(cfg.policy_for("other").max_concurrency, cfg.defaults.max_concurrency);
    /// ```
    pub fn policy_for(&self, work_type: &str) -> ExecutionPolicy {
        self.overrides
            .get(work_type)
            .copied()
            .unwrap_or(self.defaults)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the stream batch size clamped to a minimum of 1.
    #[inline]
    pub fn stream_batch_size_clamped(&self) -> usize {
        self.stream_batch_size.max(1)
    }

    /// Returns the partition buffer clamped to a minimum of 1.
    #[inline]
    pub fn partition_buffer_clamped(&self) -> usize {
        self.partition_buffer.max(1)
    }

    /// Checks the default policy and every override.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.defaults
            .check()
            .map_err(|(field, reason)| ConfigError::invalid(format!("defaults.{field}"), reason))?;
        for (name, policy) in &self.overrides {
            policy.check().map_err(|(field, reason)| {
                ConfigError::invalid(format!("work_types.{name}.{field}"), reason)
            })?;
        }
        Ok(())
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `grace = 30s`, `cancel_grace = 1s`
    /// - `bus_capacity = 1024`
    /// - all source limits `0` (unlimited)
    /// - `queue_poll_interval = 50ms`, `stream_batch_size = 64`, `partition_buffer = 64`
    /// - `on_stream_retry_exhaustion = dead_letter`
    /// - `defaults = ExecutionPolicy::default()`, no overrides
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
            cancel_grace: Duration::from_secs(1),
            request_limit: 0,
            queue_limit: 0,
            stream_limit: 0,
            queue_poll_interval: Duration::from_millis(50),
            stream_batch_size: 64,
            partition_buffer: 64,
            on_stream_retry_exhaustion: ExhaustionPolicy::default(),
            defaults: ExecutionPolicy::default(),
            overrides: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limits_are_unlimited() {
        let mut cfg = Config::default();
        assert_eq!(cfg.source_limit(SourceKind::Queue), None);
        cfg.queue_limit = 4;
        assert_eq!(cfg.source_limit(SourceKind::Queue), Some(4));
        assert_eq!(cfg.source_limit(SourceKind::Stream), None);
    }

    #[test]
    fn clamps() {
        let cfg = Config {
            bus_capacity: 0,
            stream_batch_size: 0,
            partition_buffer: 0,
            ..Config::default()
        };
        assert_eq!(cfg.bus_capacity_clamped(), 1);
        assert_eq!(cfg.stream_batch_size_clamped(), 1);
        assert_eq!(cfg.partition_buffer_clamped(), 1);
    }

    #[test]
    fn invalid_override_is_named() {
        let mut cfg = Config::default();
        cfg.overrides
            .insert("thumb".into(), ExecutionPolicy::default().with_max_concurrency(0));
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("work_types.thumb.max_concurrency"));
    }
}
