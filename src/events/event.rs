//! # Runtime events emitted by the dispatcher, adapters and runtime.
//!
//! The [`EventKind`] enum classifies events across four categories:
//! - **Work lifecycle**: starting, succeeded, failed, timeout, retry, dead-letter
//! - **Stream progress**: offset commits and halted partitions
//! - **Flow control**: sources paused/resumed by backpressure
//! - **Runtime**: shutdown and subscriber health
//!
//! ## Ordering guarantees
//! Each event carries a globally unique, monotonically increasing `seq`.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use minix_dispatch::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::WorkFailed)
//!     .with_work_type("resize_image")
//!     .with_reason("boom")
//!     .with_attempt(2);
//!
//! assert_eq!(ev.kind, EventKind::WorkFailed);
//! assert_eq!(ev.work_type.as_deref(), Some("resize_image"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::work::{Origin, SourceKind, WorkEnvelope};

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing (`reason` = panic info).
    SubscriberPanicked,
    /// Subscriber dropped an event (queue full or worker closed).
    SubscriberOverflow,

    // === Shutdown events ===
    /// Shutdown requested (OS signal or explicit call).
    ShutdownRequested,
    /// All source loops and executions stopped within the grace period.
    AllStoppedWithin,
    /// Grace period exceeded; some work was still in flight.
    GraceExceeded,

    // === Work lifecycle ===
    /// An execution is starting (`attempt` is 1-based per logical work item).
    WorkStarting,
    /// Handler returned normally.
    WorkSucceeded,
    /// Handler failed (`reason`); retryable or fatal.
    WorkFailed,
    /// Handler exceeded its timeout (`timeout_ms`).
    TimeoutHit,
    /// Another attempt was scheduled after `delay_ms`.
    RetryScheduled,
    /// Work moved to a dead-letter sink (`reason`).
    DeadLettered,
    /// A request caller's deadline elapsed before the outcome arrived.
    RequestTimedOut,

    // === Stream progress ===
    /// Partition watermark advanced to `offset`.
    OffsetCommitted,
    /// Partition stopped after retry exhaustion under `halt_partition`.
    PartitionHalted,

    // === Flow control ===
    /// A source reached its in-flight limit and stopped ingesting.
    SourcePaused,
    /// A paused source has capacity again.
    SourceResumed,
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Work type, if applicable.
    pub work_type: Option<Arc<str>>,
    /// Logical work id, if applicable.
    pub work_id: Option<Arc<str>>,
    /// Source the work came from.
    pub source: Option<SourceKind>,
    /// Attempt number (1-based).
    pub attempt: Option<u32>,
    /// Stream partition.
    pub partition: Option<u32>,
    /// Stream offset.
    pub offset: Option<u64>,
    /// Timeout in milliseconds.
    pub timeout_ms: Option<u32>,
    /// Delay before the next attempt in milliseconds.
    pub delay_ms: Option<u32>,
    /// Human-readable reason (errors, overflow details, ...).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates an event with the current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            work_type: None,
            work_id: None,
            source: None,
            attempt: None,
            partition: None,
            offset: None,
            timeout_ms: None,
            delay_ms: None,
            reason: None,
        }
    }

    /// Copies identity and origin fields from an envelope.
    pub fn with_envelope(mut self, env: &WorkEnvelope) -> Self {
        self.work_type = Some(env.work_type().into());
        self.work_id = Some(env.work_id().as_str().into());
        self.source = Some(env.origin().kind());
        if let Origin::Stream { partition, offset } = env.origin() {
            self.partition = Some(*partition);
            self.offset = Some(*offset);
        }
        if env.attempt_count() > 0 {
            self.attempt = Some(env.attempt_count());
        }
        self
    }

    /// Attaches a work type.
    #[inline]
    pub fn with_work_type(mut self, work_type: impl Into<Arc<str>>) -> Self {
        self.work_type = Some(work_type.into());
        self
    }

    /// Attaches a source kind.
    #[inline]
    pub fn with_source(mut self, source: SourceKind) -> Self {
        self.source = Some(source);
        self
    }

    /// Attaches an attempt number.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a stream position.
    #[inline]
    pub fn with_position(mut self, partition: u32, offset: u64) -> Self {
        self.partition = Some(partition);
        self.offset = Some(offset);
        self
    }

    /// Attaches a timeout (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a retry delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} info={info}"))
    }

    /// True for subscriber health events (never re-published on overflow).
    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}
