//! # Handler registration and its execution policy.

use std::sync::Arc;
use std::time::Duration;

use super::HandlerRef;
use crate::policies::{BackoffStrategy, RetryPolicy};

/// Execution policy of one work type.
///
/// ## Field semantics
/// - `max_concurrency`: concurrent executions allowed (`>= 1`)
/// - `timeout`: per-execution limit (`None` = no limit)
/// - `retry`: attempt budget and backoff, applied by the originating adapter
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExecutionPolicy {
    /// Maximum number of concurrent executions.
    pub max_concurrency: usize,
    /// Per-execution timeout.
    pub timeout: Option<Duration>,
    /// Retry budget and delays.
    pub retry: RetryPolicy,
}

impl Default for ExecutionPolicy {
    /// `max_concurrency = 1`, no timeout, [`RetryPolicy::default`].
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl ExecutionPolicy {
    /// Sets `max_concurrency`.
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    /// Sets the per-execution timeout (`Duration::ZERO` = none).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (timeout > Duration::ZERO).then_some(timeout);
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Checks value ranges; returns the offending field and reason.
    pub(crate) fn check(&self) -> Result<(), (&'static str, String)> {
        if self.max_concurrency == 0 {
            return Err(("max_concurrency", "must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(("retry_policy.max_attempts", "must be at least 1".into()));
        }
        let backoff = &self.retry.backoff;
        if backoff.base > backoff.max {
            return Err((
                "retry_policy.backoff",
                format!("base delay {:?} exceeds max delay {:?}", backoff.base, backoff.max),
            ));
        }
        if backoff.strategy == BackoffStrategy::Exponential
            && (!backoff.factor.is_finite() || backoff.factor < 1.0)
        {
            return Err((
                "retry_policy.backoff.factor",
                format!("exponential factor must be finite and >= 1.0, got {}", backoff.factor),
            ));
        }
        Ok(())
    }
}

/// A handler bound to a work type with its execution policy.
#[derive(Clone)]
pub struct Registration {
    work_type: Arc<str>,
    handler: HandlerRef,
    policy: ExecutionPolicy,
}

impl Registration {
    pub(crate) fn new(work_type: Arc<str>, handler: HandlerRef, policy: ExecutionPolicy) -> Self {
        Self {
            work_type,
            handler,
            policy,
        }
    }

    /// Work type this registration serves.
    pub fn work_type(&self) -> &str {
        &self.work_type
    }

    /// The handler.
    pub fn handler(&self) -> &HandlerRef {
        &self.handler
    }

    /// The execution policy.
    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("work_type", &self.work_type)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
