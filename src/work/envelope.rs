//! # Work envelope: the normalized unit of dispatchable work.
//!
//! Created by a source adapter on ingestion; the only mutation afterwards is the
//! attempt counter, bumped by the dispatcher when an execution starts. Dropped
//! once the adapter has acted on a terminal [`Outcome`](crate::Outcome).
//!
//! ## Identity
//! - [`EnvelopeId`] is unique per envelope **instance** (fresh on every ingestion).
//! - [`WorkId`] names the **logical** work item and survives retries: in-place
//!   retries reuse the envelope, queue redeliveries build a new envelope with the
//!   same `WorkId` and a carried-over attempt count.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use super::Payload;

/// Unique identifier of one envelope instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvelopeId(Uuid);

impl EnvelopeId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EnvelopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Logical work identifier, stable across retries and redeliveries.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkId(Arc<str>);

impl WorkId {
    /// Random logical id (for work whose source carries none).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string().into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl From<String> for WorkId {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque delivery handle issued by a queue backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageHandle(Arc<str>);

impl MessageHandle {
    /// Wraps a backend handle.
    pub fn new(handle: impl Into<Arc<str>>) -> Self {
        Self(handle.into())
    }

    /// The handle as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of source a piece of work came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    /// Synchronous inbound request.
    Request,
    /// Task queue (at-least-once).
    Queue,
    /// Partitioned, offset-ordered event stream.
    Stream,
}

impl SourceKind {
    /// All kinds, in a fixed order.
    pub const ALL: [SourceKind; 3] = [SourceKind::Request, SourceKind::Queue, SourceKind::Stream];

    /// Returns a short stable label (snake_case).
    pub fn as_label(&self) -> &'static str {
        match self {
            SourceKind::Request => "request",
            SourceKind::Queue => "queue",
            SourceKind::Stream => "stream",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            SourceKind::Request => 0,
            SourceKind::Queue => 1,
            SourceKind::Stream => 2,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Origin of an envelope with the metadata its adapter needs to acknowledge it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Synchronous request; the caller holds the completion handle.
    Request,
    /// Queue message.
    Queue {
        /// Delivery handle for ack/requeue/dead-letter.
        handle: MessageHandle,
        /// 1-based delivery count reported by the backend.
        delivery_count: u32,
    },
    /// Stream record.
    Stream {
        /// Partition the record belongs to.
        partition: u32,
        /// Offset within the partition.
        offset: u64,
    },
}

impl Origin {
    /// The source kind of this origin.
    pub fn kind(&self) -> SourceKind {
        match self {
            Origin::Request => SourceKind::Request,
            Origin::Queue { .. } => SourceKind::Queue,
            Origin::Stream { .. } => SourceKind::Stream,
        }
    }
}

/// Normalized unit of work passed through the dispatch core.
#[derive(Clone, Debug)]
pub struct WorkEnvelope {
    id: EnvelopeId,
    work_id: WorkId,
    work_type: Arc<str>,
    payload: Payload,
    origin: Origin,
    attempt_count: u32,
    enqueued_at: DateTime<Utc>,
    deadline: Option<Instant>,
}

impl WorkEnvelope {
    /// Creates an envelope with a fresh instance id, a generated logical id and no attempts.
    pub fn new(work_type: impl Into<Arc<str>>, payload: Payload, origin: Origin) -> Self {
        Self {
            id: EnvelopeId::new(),
            work_id: WorkId::generate(),
            work_type: work_type.into(),
            payload,
            origin,
            attempt_count: 0,
            enqueued_at: Utc::now(),
            deadline: None,
        }
    }

    /// Sets the logical work id (e.g. carried by a queue message).
    pub fn with_work_id(mut self, work_id: WorkId) -> Self {
        self.work_id = work_id;
        self
    }

    /// Sets the absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Carries over attempts already made by earlier deliveries.
    pub fn with_prior_attempts(mut self, attempts: u32) -> Self {
        self.attempt_count = attempts;
        self
    }

    /// Instance id.
    pub fn id(&self) -> EnvelopeId {
        self.id
    }

    /// Logical id.
    pub fn work_id(&self) -> &WorkId {
        &self.work_id
    }

    /// Work type used to resolve the handler.
    pub fn work_type(&self) -> &str {
        &self.work_type
    }

    /// Payload handed to the handler.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Origin with acknowledgement metadata.
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Executions started so far.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Wall-clock ingestion time.
    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Absolute deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Records the start of an execution; returns the new attempt number (1-based).
    pub(crate) fn begin_attempt(&mut self) -> u32 {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.attempt_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_per_instance() {
        let a = WorkEnvelope::new("t", Payload::Empty, Origin::Request);
        let b = WorkEnvelope::new("t", Payload::Empty, Origin::Request);
        assert_ne!(a.id(), b.id());
        assert_ne!(a.work_id(), b.work_id());
    }

    #[test]
    fn redelivery_keeps_logical_id() {
        let work_id = WorkId::from("job-7");
        let first = WorkEnvelope::new("t", Payload::Empty, Origin::Request).with_work_id(work_id.clone());
        let again = WorkEnvelope::new("t", Payload::Empty, Origin::Request)
            .with_work_id(work_id.clone())
            .with_prior_attempts(1);
        assert_eq!(first.work_id(), again.work_id());
        assert_ne!(first.id(), again.id());
        assert_eq!(again.attempt_count(), 1);
    }

    #[test]
    fn attempts_increment() {
        let mut env = WorkEnvelope::new("t", Payload::Empty, Origin::Request);
        assert_eq!(env.attempt_count(), 0);
        assert_eq!(env.begin_attempt(), 1);
        assert_eq!(env.begin_attempt(), 2);
    }

    #[test]
    fn origin_kinds() {
        let q = Origin::Queue {
            handle: MessageHandle::new("h"),
            delivery_count: 1,
        };
        assert_eq!(q.kind(), SourceKind::Queue);
        assert_eq!(Origin::Stream { partition: 0, offset: 3 }.kind(), SourceKind::Stream);
        assert_eq!(SourceKind::Stream.index(), 2);
    }
}
