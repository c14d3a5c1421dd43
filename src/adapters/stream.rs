//! # Stream adapter: ordered, partitioned consumption with watermark commits.
//!
//! ```text
//! poller ── poll(batch) ──► per record: watermark.track(offset)? ── no ──► skip (redelivery)
//!                                  │ yes
//!                                  ▼ partition backlog (pause partition when full)
//!          try_reserve + try_admit(Stream) lease, never waits
//!                         mpsc ──► partition worker (one per partition, sequential)
//!                                    submit → retry in place (partition waits)
//!                                    terminal → watermark.complete(offset)
//!                                             → commit(partition, watermark) if advanced
//! ```
//!
//! ## Rules
//! - Records of one partition are dispatched one at a time, in offset order.
//! - A commit covers a contiguous prefix of terminal offsets and never moves back.
//! - The poller never waits on one partition. Records queue in a per-partition
//!   backlog; a partition whose backlog reaches `partition_buffer` is paused
//!   on the backend until its worker catches up.
//! - On retry exhaustion (or fatal failure) the configured
//!   [`ExhaustionPolicy`] applies: dead-letter and advance, or halt the partition.
//! - A halted partition stops processing and committing; its records are left
//!   for redelivery. Other partitions keep running, and the adapter reports
//!   [`RuntimeError::PartitionHalted`] when it stops.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{AdapterContext, DeadLetter, DeadLetterSink, SourceAdapter, Watermark};
use crate::core::{BackpressureController, Dispatcher, SourceLease};
use crate::error::{BackendError, RuntimeError};
use crate::events::{Event, EventKind};
use crate::policies::{ExhaustionPolicy, RetryPolicy};
use crate::work::{Origin, Outcome, Payload, SourceKind, WorkEnvelope};

/// One record of a partitioned stream.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamRecord {
    /// Partition.
    pub partition: u32,
    /// Offset within the partition.
    pub offset: u64,
    /// Work type (routing key).
    pub work_type: String,
    /// Payload.
    pub payload: Payload,
}

/// Partitioned, offset-ordered event source.
#[async_trait]
pub trait StreamBackend: Send + Sync + 'static {
    /// Fetches up to `max` records, in offset order within each partition.
    async fn poll(&self, max: usize) -> Result<Vec<StreamRecord>, BackendError>;

    /// Commits the cumulative watermark of a partition.
    async fn commit(&self, partition: u32, offset: u64) -> Result<(), BackendError>;

    /// Stops delivering records of a partition (halted, or its backlog is full).
    async fn pause(&self, _partition: u32) -> Result<(), BackendError> {
        Ok(())
    }

    /// Resumes delivery of a partition paused for a full backlog.
    async fn resume(&self, _partition: u32) -> Result<(), BackendError> {
        Ok(())
    }
}

/// A partition stopped under [`ExhaustionPolicy::HaltPartition`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HaltedPartition {
    /// Partition.
    pub partition: u32,
    /// Offset that could not be processed.
    pub offset: u64,
    /// Last failure.
    pub reason: String,
}

impl From<HaltedPartition> for RuntimeError {
    fn from(h: HaltedPartition) -> Self {
        RuntimeError::PartitionHalted {
            partition: h.partition,
            offset: h.offset,
            reason: h.reason,
        }
    }
}

/// Consumes a [`StreamBackend`] with per-partition ordering.
pub struct StreamAdapter {
    name: String,
    backend: Arc<dyn StreamBackend>,
    dead_letters: Arc<dyn DeadLetterSink>,
    halted: Arc<Mutex<Vec<HaltedPartition>>>,
}

struct Partition {
    tx: mpsc::Sender<(StreamRecord, SourceLease)>,
    watermark: Arc<Mutex<Watermark>>,
    /// Polled records not yet handed to the worker, in offset order.
    backlog: VecDeque<StreamRecord>,
    /// Paused on the backend because the backlog is full.
    paused: bool,
}

/// Shared by all workers of one adapter run.
#[derive(Clone)]
struct WorkerCtx {
    dispatcher: Arc<Dispatcher>,
    backend: Arc<dyn StreamBackend>,
    dead_letters: Arc<dyn DeadLetterSink>,
    exhaustion: ExhaustionPolicy,
    halted: Arc<Mutex<Vec<HaltedPartition>>>,
    token: CancellationToken,
}

impl StreamAdapter {
    /// Creates an adapter named `stream`.
    pub fn new(backend: Arc<dyn StreamBackend>, dead_letters: Arc<dyn DeadLetterSink>) -> Self {
        Self {
            name: "stream".into(),
            backend,
            dead_letters,
            halted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Renames the adapter (shown in logs).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Partitions halted so far.
    pub fn halted(&self) -> Vec<HaltedPartition> {
        lock(&self.halted).clone()
    }

    fn is_halted(&self, partition: u32) -> bool {
        lock(&self.halted).iter().any(|h| h.partition == partition)
    }

    /// Moves backlogged records into their partition channels without waiting.
    ///
    /// A partition whose backlog reaches `high_water` is paused on the backend
    /// and resumed once the backlog drains.
    async fn hand_off(
        &self,
        partitions: &mut HashMap<u32, Partition>,
        bp: &BackpressureController,
        high_water: usize,
    ) {
        let mut saturated = false;
        for (&partition, part) in partitions.iter_mut() {
            while !saturated && !part.backlog.is_empty() {
                let permit = match part.tx.try_reserve() {
                    Ok(permit) => permit,
                    Err(TrySendError::Full(())) => break,
                    Err(TrySendError::Closed(())) => {
                        // worker exited after halting; the records stay uncommitted
                        part.backlog.clear();
                        break;
                    }
                };
                let Ok(lease) = bp.try_admit(SourceKind::Stream) else {
                    saturated = true;
                    break;
                };
                if let Some(record) = part.backlog.pop_front() {
                    permit.send((record, lease));
                }
            }

            if !part.paused && part.backlog.len() >= high_water {
                debug!(adapter = %self.name, partition, backlog = part.backlog.len(), "pausing busy partition");
                match self.backend.pause(partition).await {
                    Ok(()) => part.paused = true,
                    Err(e) => warn!(partition, error = %e, "failed to pause busy partition"),
                }
            } else if part.paused && part.backlog.is_empty() && !self.is_halted(partition) {
                debug!(adapter = %self.name, partition, "resuming drained partition");
                match self.backend.resume(partition).await {
                    Ok(()) => part.paused = false,
                    Err(e) => warn!(partition, error = %e, "failed to resume partition"),
                }
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for StreamAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Stream
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: AdapterContext) -> Result<(), RuntimeError> {
        let bp = Arc::clone(ctx.dispatcher.backpressure());
        let batch = ctx.config.stream_batch_size_clamped();
        let buffer = ctx.config.partition_buffer_clamped();
        let idle = ctx.config.queue_poll_interval;
        let wctx = WorkerCtx {
            dispatcher: Arc::clone(&ctx.dispatcher),
            backend: Arc::clone(&self.backend),
            dead_letters: Arc::clone(&self.dead_letters),
            exhaustion: ctx.config.on_stream_retry_exhaustion,
            halted: Arc::clone(&self.halted),
            token: ctx.token.clone(),
        };

        let mut partitions: HashMap<u32, Partition> = HashMap::new();
        let mut workers = JoinSet::new();

        loop {
            tokio::select! {
                _ = ctx.token.cancelled() => break,
                _ = bp.wait_for_capacity(SourceKind::Stream) => {}
            }
            self.hand_off(&mut partitions, &bp, buffer).await;

            let records = tokio::select! {
                _ = ctx.token.cancelled() => break,
                polled = self.backend.poll(batch) => polled,
            };
            let records = match records {
                Ok(records) if !records.is_empty() => records,
                Ok(_) => {
                    if !sleep_or_cancel(&ctx.token, idle).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    warn!(adapter = %self.name, error = %e, "stream poll failed");
                    if !sleep_or_cancel(&ctx.token, idle).await {
                        break;
                    }
                    continue;
                }
            };

            for record in records {
                if self.is_halted(record.partition) {
                    continue;
                }
                let part = partitions.entry(record.partition).or_insert_with(|| {
                    let (tx, rx) = mpsc::channel(buffer);
                    let watermark = Arc::new(Mutex::new(Watermark::new()));
                    workers.spawn(partition_worker(
                        wctx.clone(),
                        record.partition,
                        rx,
                        Arc::clone(&watermark),
                    ));
                    Partition {
                        tx,
                        watermark,
                        backlog: VecDeque::new(),
                        paused: false,
                    }
                });
                if !lock(&part.watermark).track(record.offset) {
                    debug!(partition = record.partition, offset = record.offset, "skipping redelivered record");
                    continue;
                }
                part.backlog.push_back(record);
            }
        }

        drop(partitions);
        while workers.join_next().await.is_some() {}

        match self.halted().into_iter().next() {
            Some(halt) => Err(halt.into()),
            None => Ok(()),
        }
    }
}

enum Settled {
    Done,
    Halted,
    Shutdown,
}

async fn partition_worker(
    ctx: WorkerCtx,
    partition: u32,
    mut rx: mpsc::Receiver<(StreamRecord, SourceLease)>,
    watermark: Arc<Mutex<Watermark>>,
) {
    loop {
        let next = tokio::select! {
            _ = ctx.token.cancelled() => return,
            next = rx.recv() => next,
        };
        let Some((record, lease)) = next else {
            return;
        };
        let offset = record.offset;

        match process(&ctx, record).await {
            Settled::Done => {
                let advanced = lock(&watermark).complete(offset);
                if let Some(mark) = advanced {
                    commit(&ctx, partition, mark).await;
                }
                drop(lease);
            }
            Settled::Halted | Settled::Shutdown => return,
        }
    }
}

async fn process(ctx: &WorkerCtx, record: StreamRecord) -> Settled {
    let origin = Origin::Stream {
        partition: record.partition,
        offset: record.offset,
    };
    let mut env = WorkEnvelope::new(record.work_type, record.payload, origin);
    let retry = ctx
        .dispatcher
        .registry()
        .lookup(env.work_type())
        .map(|r| r.policy().retry)
        .unwrap_or_else(|_| RetryPolicy::never());

    loop {
        let outcome = ctx.dispatcher.submit(&mut env).await;
        if ctx.token.is_cancelled() && !outcome.is_success() {
            return Settled::Shutdown;
        }
        if outcome.is_success() {
            return Settled::Done;
        }

        let attempts = env.attempt_count();
        if outcome.is_retryable() && retry.should_retry(attempts) {
            let delay = retry.delay_after(attempts);
            ctx.dispatcher.bus().publish(
                Event::new(EventKind::RetryScheduled)
                    .with_envelope(&env)
                    .with_delay(delay)
                    .with_reason(outcome.reason().unwrap_or_default()),
            );
            if !sleep_or_cancel(&ctx.token, delay).await {
                return Settled::Shutdown;
            }
            continue;
        }

        return exhausted(ctx, &env, outcome).await;
    }
}

async fn exhausted(ctx: &WorkerCtx, env: &WorkEnvelope, outcome: Outcome) -> Settled {
    let reason = outcome.reason().unwrap_or_default();
    let Origin::Stream { partition, offset } = *env.origin() else {
        return Settled::Halted;
    };

    if ctx.exhaustion == ExhaustionPolicy::DeadLetter {
        match ctx
            .dead_letters
            .dead_letter(DeadLetter::from_envelope(env, reason.clone()))
            .await
        {
            Ok(()) => {
                ctx.dispatcher.bus().publish(
                    Event::new(EventKind::DeadLettered)
                        .with_envelope(env)
                        .with_reason(reason),
                );
                return Settled::Done;
            }
            Err(e) => {
                error!(partition, offset, error = %e, "dead-letter sink failed; halting partition");
                return halt(ctx, env, partition, offset, format!("dead-letter failed: {e}")).await;
            }
        }
    }
    halt(ctx, env, partition, offset, reason).await
}

async fn halt(
    ctx: &WorkerCtx,
    env: &WorkEnvelope,
    partition: u32,
    offset: u64,
    reason: String,
) -> Settled {
    error!(partition, offset, work_type = env.work_type(), %reason, "partition halted");
    lock(&ctx.halted).push(HaltedPartition {
        partition,
        offset,
        reason: reason.clone(),
    });
    ctx.dispatcher.bus().publish(
        Event::new(EventKind::PartitionHalted)
            .with_envelope(env)
            .with_reason(reason),
    );
    if let Err(e) = ctx.backend.pause(partition).await {
        warn!(partition, error = %e, "failed to pause halted partition");
    }
    Settled::Halted
}

async fn commit(ctx: &WorkerCtx, partition: u32, offset: u64) {
    match ctx.backend.commit(partition, offset).await {
        Ok(()) => ctx.dispatcher.bus().publish(
            Event::new(EventKind::OffsetCommitted)
                .with_source(SourceKind::Stream)
                .with_position(partition, offset),
        ),
        // the next successful commit covers this one
        Err(e) => warn!(partition, offset, error = %e, "offset commit failed"),
    }
}

async fn sleep_or_cancel(token: &CancellationToken, d: std::time::Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = time::sleep(d) => true,
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
