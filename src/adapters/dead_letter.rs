//! # Dead-letter boundary for stream-origin work.
//!
//! Queue backends own their dead-letter storage (`QueueBackend::dead_letter`);
//! streams have no such notion, so the stream adapter writes to a [`DeadLetterSink`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::BackendError;
use crate::work::{Origin, Payload, WorkEnvelope, WorkId};

/// Work that reached a terminal failure outside the primary delivery path.
#[derive(Clone, Debug, PartialEq)]
pub struct DeadLetter {
    /// Logical work id.
    pub work_id: WorkId,
    /// Work type.
    pub work_type: String,
    /// Original payload.
    pub payload: Payload,
    /// Where the work came from.
    pub origin: Origin,
    /// Executions made.
    pub attempts: u32,
    /// Last failure.
    pub reason: String,
    /// When it was dead-lettered.
    pub at: DateTime<Utc>,
}

impl DeadLetter {
    /// Captures an envelope and its final failure reason.
    pub fn from_envelope(env: &WorkEnvelope, reason: impl Into<String>) -> Self {
        Self {
            work_id: env.work_id().clone(),
            work_type: env.work_type().to_string(),
            payload: env.payload().clone(),
            origin: env.origin().clone(),
            attempts: env.attempt_count(),
            reason: reason.into(),
            at: Utc::now(),
        }
    }
}

/// Terminal storage for failed work.
#[async_trait]
pub trait DeadLetterSink: Send + Sync + 'static {
    /// Persists one dead letter.
    async fn dead_letter(&self, letter: DeadLetter) -> Result<(), BackendError>;
}
