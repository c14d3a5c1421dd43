//! # LogWriter: renders runtime events through `tracing`
//!
//! Failures and dead letters log at `warn`, halted partitions and exceeded
//! grace at `error`, everything else at `debug`/`info`.
//!
//! ## Example output (fmt layer)
//! ```text
//! DEBUG work starting work_type="resize_image" source=queue attempt=1
//!  WARN work failed work_type="resize_image" attempt=1 reason="connection refused"
//!  INFO retry scheduled work_type="resize_image" delay_ms=200 attempt=1
//!  WARN dead-lettered work_type="resize_image" reason="retries exhausted"
//! ERROR partition halted partition=0 offset=10
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Constructs a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let work_type = e.work_type.as_deref().unwrap_or("-");
        let source = e.source.map(|s| s.as_label()).unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::WorkStarting => {
                debug!(seq = e.seq, work_type, source, attempt = e.attempt, "work starting");
            }
            EventKind::WorkSucceeded => {
                debug!(seq = e.seq, work_type, source, attempt = e.attempt, "work succeeded");
            }
            EventKind::WorkFailed => {
                warn!(seq = e.seq, work_type, source, attempt = e.attempt, reason, "work failed");
            }
            EventKind::TimeoutHit => {
                warn!(seq = e.seq, work_type, source, timeout_ms = e.timeout_ms, "timeout hit");
            }
            EventKind::RetryScheduled => {
                info!(seq = e.seq, work_type, source, delay_ms = e.delay_ms, attempt = e.attempt, reason, "retry scheduled");
            }
            EventKind::DeadLettered => {
                warn!(seq = e.seq, work_type, source, partition = e.partition, offset = e.offset, reason, "dead-lettered");
            }
            EventKind::RequestTimedOut => {
                warn!(seq = e.seq, work_type, timeout_ms = e.timeout_ms, "request deadline elapsed");
            }
            EventKind::OffsetCommitted => {
                debug!(seq = e.seq, partition = e.partition, offset = e.offset, "offset committed");
            }
            EventKind::PartitionHalted => {
                error!(seq = e.seq, work_type, partition = e.partition, offset = e.offset, reason, "partition halted");
            }
            EventKind::SourcePaused => {
                info!(seq = e.seq, source, reason, "source paused");
            }
            EventKind::SourceResumed => {
                info!(seq = e.seq, source, "source resumed");
            }
            EventKind::ShutdownRequested => info!(seq = e.seq, "shutdown requested"),
            EventKind::AllStoppedWithin => info!(seq = e.seq, "all stopped within grace"),
            EventKind::GraceExceeded => error!(seq = e.seq, reason, "grace exceeded"),
            EventKind::SubscriberOverflow => warn!(seq = e.seq, reason, "subscriber overflow"),
            EventKind::SubscriberPanicked => error!(seq = e.seq, reason, "subscriber panicked"),
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
