//! # Stream retry-exhaustion policy.
//!
//! Stream work blocks its partition's watermark while it is retried in place.
//! When the attempt budget runs out, the partition must either give up on the
//! record or stop. The choice is explicit configuration:
//!
//! ```text
//! on_stream_retry_exhaustion: dead_letter     → dead-letter record, commit, continue
//! on_stream_retry_exhaustion: halt_partition  → stop partition, never commit past it
//! ```

use serde::{Deserialize, Serialize};

/// Disposition of a stream record that exhausted its retries (or failed fatally).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Route the record to the dead-letter sink and advance the watermark past it.
    #[default]
    DeadLetter,
    /// Stop consuming the partition and surface a fatal condition.
    HaltPartition,
}

impl ExhaustionPolicy {
    /// Returns a short stable label (snake_case).
    pub fn as_label(&self) -> &'static str {
        match self {
            ExhaustionPolicy::DeadLetter => "dead_letter",
            ExhaustionPolicy::HaltPartition => "halt_partition",
        }
    }
}
