//! # Cumulative commit watermark of one stream partition.
//!
//! Offsets are tracked when ingested and completed when their envelope reaches a
//! terminal outcome. The watermark only moves across a **contiguous prefix** of
//! completed offsets, so it is non-decreasing and never passes an unresolved one.
//!
//! ```text
//! tracked:   10  11  12
//! completed:     11  12     → watermark unchanged (10 unresolved)
//! complete(10)              → watermark = 12
//! ```

use std::collections::BTreeMap;

/// Pending offsets and the last committed one.
#[derive(Debug, Default)]
pub struct Watermark {
    committed: Option<u64>,
    pending: BTreeMap<u64, bool>,
}

impl Watermark {
    /// Empty tracker (nothing committed yet).
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an ingested offset.
    ///
    /// Returns `false` for offsets already pending or at/below the watermark
    /// (redeliveries), which must not be processed again.
    pub fn track(&mut self, offset: u64) -> bool {
        if self.committed.is_some_and(|c| offset <= c) || self.pending.contains_key(&offset) {
            return false;
        }
        self.pending.insert(offset, false);
        true
    }

    /// Marks an offset terminal; returns the new watermark if it advanced.
    pub fn complete(&mut self, offset: u64) -> Option<u64> {
        *self.pending.get_mut(&offset)? = true;

        let mut advanced = None;
        while let Some(entry) = self.pending.first_entry() {
            if !*entry.get() {
                break;
            }
            let (done, _) = entry.remove_entry();
            advanced = Some(done);
        }
        if advanced.is_some() {
            self.committed = advanced;
        }
        advanced
    }

    /// Last offset up to which everything reached a terminal outcome.
    pub fn committed(&self) -> Option<u64> {
        self.committed
    }

    /// Offsets ingested but not yet covered by the watermark.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
