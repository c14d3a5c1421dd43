//! # In-memory backends.
//!
//! Deterministic, inspectable implementations of the backend boundaries for
//! tests, demos and embedding without external infrastructure. Time-based
//! behavior (requeue delays) follows `tokio::time`, so paused-clock tests work.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{DeadLetter, DeadLetterSink, QueueBackend, QueueMessage, StreamBackend, StreamRecord};
use crate::error::BackendError;
use crate::work::{MessageHandle, Payload, WorkId};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone, Debug)]
struct Entry {
    work_id: WorkId,
    work_type: String,
    payload: Payload,
    deliveries: u32,
}

/// A message moved to the queue's dead-letter storage.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueDeadLetter {
    /// Logical id.
    pub work_id: WorkId,
    /// Work type.
    pub work_type: String,
    /// Payload.
    pub payload: Payload,
    /// Deliveries made before dead-lettering.
    pub deliveries: u32,
    /// Failure reason.
    pub reason: String,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<(Instant, Entry)>,
    in_flight: HashMap<MessageHandle, Entry>,
    dead: Vec<QueueDeadLetter>,
    acked: Vec<WorkId>,
    deliveries: HashMap<WorkId, u32>,
}

/// At-least-once in-memory task queue.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a message with a generated id.
    pub fn push(&self, work_type: impl Into<String>, payload: Payload) -> WorkId {
        self.push_with_id(WorkId::generate(), work_type, payload)
    }

    /// Enqueues a message with a caller-chosen logical id.
    pub fn push_with_id(&self, work_id: WorkId, work_type: impl Into<String>, payload: Payload) -> WorkId {
        let entry = Entry {
            work_id: work_id.clone(),
            work_type: work_type.into(),
            payload,
            deliveries: 0,
        };
        lock(&self.state).ready.push_back((Instant::now(), entry));
        work_id
    }

    /// Ids acknowledged so far, in ack order.
    pub fn acked(&self) -> Vec<WorkId> {
        lock(&self.state).acked.clone()
    }

    /// Dead-lettered messages, in order.
    pub fn dead_letters(&self) -> Vec<QueueDeadLetter> {
        lock(&self.state).dead.clone()
    }

    /// How many times a logical message was delivered.
    pub fn deliveries(&self, work_id: &WorkId) -> u32 {
        lock(&self.state).deliveries.get(work_id).copied().unwrap_or(0)
    }

    /// Messages waiting (ready or delayed).
    pub fn len(&self) -> usize {
        lock(&self.state).ready.len()
    }

    /// True when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when nothing is waiting and nothing is delivered-but-unsettled.
    pub fn is_idle(&self) -> bool {
        let state = lock(&self.state);
        state.ready.is_empty() && state.in_flight.is_empty()
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn pull(&self) -> Result<Option<QueueMessage>, BackendError> {
        let mut state = lock(&self.state);
        let now = Instant::now();
        let Some(pos) = state.ready.iter().position(|(at, _)| *at <= now) else {
            return Ok(None);
        };
        let Some((_, mut entry)) = state.ready.remove(pos) else {
            return Ok(None);
        };

        entry.deliveries += 1;
        *state.deliveries.entry(entry.work_id.clone()).or_default() += 1;
        let handle = MessageHandle::new(format!("{}#{}", entry.work_id, entry.deliveries));
        let msg = QueueMessage {
            handle: handle.clone(),
            work_id: entry.work_id.clone(),
            work_type: entry.work_type.clone(),
            payload: entry.payload.clone(),
            delivery_count: entry.deliveries,
        };
        state.in_flight.insert(handle, entry);
        Ok(Some(msg))
    }

    async fn ack(&self, handle: &MessageHandle) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        let entry = state.in_flight.remove(handle).ok_or_else(|| unknown(handle))?;
        state.acked.push(entry.work_id);
        Ok(())
    }

    async fn requeue(&self, handle: &MessageHandle, delay: Duration) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        let entry = state.in_flight.remove(handle).ok_or_else(|| unknown(handle))?;
        state.ready.push_back((Instant::now() + delay, entry));
        Ok(())
    }

    async fn dead_letter(&self, handle: &MessageHandle, reason: &str) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        let entry = state.in_flight.get(handle).cloned().ok_or_else(|| unknown(handle))?;
        state.dead.push(QueueDeadLetter {
            work_id: entry.work_id,
            work_type: entry.work_type,
            payload: entry.payload,
            deliveries: entry.deliveries,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

fn unknown(handle: &MessageHandle) -> BackendError {
    BackendError::UnknownHandle {
        handle: handle.to_string(),
    }
}

#[derive(Default)]
struct PartitionLog {
    records: Vec<(u64, String, Payload)>,
    cursor: usize,
    commits: Vec<u64>,
    paused: bool,
}

/// Partitioned in-memory log with commit history.
#[derive(Default)]
pub struct MemoryStream {
    partitions: Mutex<BTreeMap<u32, PartitionLog>>,
}

impl MemoryStream {
    /// Empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record at the next offset of `partition` (starting at 0); returns the offset.
    pub fn append(&self, partition: u32, work_type: impl Into<String>, payload: Payload) -> u64 {
        let mut parts = lock(&self.partitions);
        let log = parts.entry(partition).or_default();
        let offset = log.records.last().map_or(0, |(o, _, _)| o + 1);
        log.records.push((offset, work_type.into(), payload));
        offset
    }

    /// Appends a record at an explicit offset, which must exceed the last one.
    pub fn append_at(
        &self,
        partition: u32,
        offset: u64,
        work_type: impl Into<String>,
        payload: Payload,
    ) -> Result<(), BackendError> {
        let mut parts = lock(&self.partitions);
        let log = parts.entry(partition).or_default();
        if let Some((last, _, _)) = log.records.last() {
            if offset <= *last {
                return Err(BackendError::Unavailable {
                    reason: format!("offset {offset} not after {last} in partition {partition}"),
                });
            }
        }
        log.records.push((offset, work_type.into(), payload));
        Ok(())
    }

    /// Rewinds delivery of `partition` to just after its committed watermark
    /// (simulates a consumer restart).
    pub fn rewind(&self, partition: u32) {
        let mut parts = lock(&self.partitions);
        if let Some(log) = parts.get_mut(&partition) {
            let committed = log.commits.last().copied();
            log.cursor = log
                .records
                .iter()
                .position(|(o, _, _)| committed.is_none_or(|c| *o > c))
                .unwrap_or(log.records.len());
            log.paused = false;
        }
    }

    /// Last committed offset of `partition`.
    pub fn committed(&self, partition: u32) -> Option<u64> {
        lock(&self.partitions)
            .get(&partition)
            .and_then(|log| log.commits.last().copied())
    }

    /// Every commit of `partition`, in order.
    pub fn commits(&self, partition: u32) -> Vec<u64> {
        lock(&self.partitions)
            .get(&partition)
            .map(|log| log.commits.clone())
            .unwrap_or_default()
    }

    /// Whether delivery of `partition` is paused.
    pub fn is_paused(&self, partition: u32) -> bool {
        lock(&self.partitions)
            .get(&partition)
            .is_some_and(|log| log.paused)
    }
}

#[async_trait]
impl StreamBackend for MemoryStream {
    async fn poll(&self, max: usize) -> Result<Vec<StreamRecord>, BackendError> {
        let mut parts = lock(&self.partitions);
        let mut out = Vec::new();
        // round-robin so one busy partition cannot starve the others
        while out.len() < max {
            let before = out.len();
            for (partition, log) in parts.iter_mut() {
                if out.len() >= max {
                    break;
                }
                if log.paused || log.cursor >= log.records.len() {
                    continue;
                }
                let (offset, work_type, payload) = log.records[log.cursor].clone();
                log.cursor += 1;
                out.push(StreamRecord {
                    partition: *partition,
                    offset,
                    work_type,
                    payload,
                });
            }
            if out.len() == before {
                break;
            }
        }
        Ok(out)
    }

    async fn commit(&self, partition: u32, offset: u64) -> Result<(), BackendError> {
        let mut parts = lock(&self.partitions);
        let log = parts.entry(partition).or_default();
        if let Some(&committed) = log.commits.last() {
            if offset < committed {
                return Err(BackendError::CommitRegression {
                    partition,
                    offset,
                    committed,
                });
            }
        }
        log.commits.push(offset);
        Ok(())
    }

    async fn pause(&self, partition: u32) -> Result<(), BackendError> {
        lock(&self.partitions).entry(partition).or_default().paused = true;
        Ok(())
    }

    async fn resume(&self, partition: u32) -> Result<(), BackendError> {
        if let Some(log) = lock(&self.partitions).get_mut(&partition) {
            log.paused = false;
        }
        Ok(())
    }
}

/// Dead-letter sink that keeps letters in memory.
#[derive(Default)]
pub struct MemoryDeadLetters {
    letters: Mutex<Vec<DeadLetter>>,
}

impl MemoryDeadLetters {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Letters received so far.
    pub fn letters(&self) -> Vec<DeadLetter> {
        lock(&self.letters).clone()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetters {
    async fn dead_letter(&self, letter: DeadLetter) -> Result<(), BackendError> {
        lock(&self.letters).push(letter);
        Ok(())
    }
}
