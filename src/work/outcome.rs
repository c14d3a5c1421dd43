//! # Execution outcome.
//!
//! The dispatcher always produces exactly one [`Outcome`] per execution; handler
//! failures, panics and routing errors are folded into it. The originating
//! adapter alone decides the terminal disposition.

use std::time::Duration;

use super::Payload;

/// Result of one handler execution.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Handler returned normally.
    Success(Payload),
    /// Transient failure; eligible for retry within the policy budget.
    RetryableFailure {
        /// Failure message.
        reason: String,
    },
    /// Unrecoverable failure (including unknown work types); never retried.
    FatalFailure {
        /// Failure message.
        reason: String,
    },
    /// Handler exceeded its allotted duration (or the work's deadline).
    TimedOut {
        /// The limit that was exceeded.
        timeout: Duration,
    },
}

impl Outcome {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::RetryableFailure { .. } => "retryable_failure",
            Outcome::FatalFailure { .. } => "fatal_failure",
            Outcome::TimedOut { .. } => "timed_out",
        }
    }

    /// True for [`Outcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Whether the adapter may retry this outcome (`RetryableFailure` or `TimedOut`).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Outcome::RetryableFailure { .. } | Outcome::TimedOut { .. })
    }

    /// Human-readable failure reason; `None` on success.
    pub fn reason(&self) -> Option<String> {
        match self {
            Outcome::Success(_) => None,
            Outcome::RetryableFailure { reason } | Outcome::FatalFailure { reason } => {
                Some(reason.clone())
            }
            Outcome::TimedOut { timeout } => Some(format!("timed out after {timeout:?}")),
        }
    }

    pub(crate) fn fatal(reason: impl Into<String>) -> Self {
        Outcome::FatalFailure {
            reason: reason.into(),
        }
    }
}
