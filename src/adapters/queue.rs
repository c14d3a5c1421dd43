//! # Queue adapter: at-least-once task queue consumption.
//!
//! ```text
//! loop {
//!   ├─► admit(Queue)                 (pauses pulling while saturated)
//!   ├─► backend.pull()               (idle sleep when empty / on error)
//!   └─► spawn: envelope → dispatcher.submit → settle
//!         Success                               → ack
//!         Retryable/TimedOut, attempts < max    → requeue(handle, backoff)
//!         otherwise (exhausted, fatal)          → dead_letter + ack
//!         shutdown interrupted the attempt      → requeue(handle, 0)
//! }
//! ```
//!
//! The attempt budget spans deliveries: a redelivered message carries
//! `delivery_count - 1` prior attempts into its new envelope. No ordering is
//! guaranteed across messages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{AdapterContext, SourceAdapter};
use crate::core::{Dispatcher, SourceLease};
use crate::error::{BackendError, RuntimeError};
use crate::events::{Event, EventKind};
use crate::policies::RetryPolicy;
use crate::work::{MessageHandle, Origin, Outcome, Payload, SourceKind, WorkEnvelope, WorkId};

/// One delivery of a queued message.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueMessage {
    /// Delivery handle for ack/requeue/dead-letter.
    pub handle: MessageHandle,
    /// Logical id, stable across redeliveries.
    pub work_id: WorkId,
    /// Work type.
    pub work_type: String,
    /// Payload.
    pub payload: Payload,
    /// 1-based delivery count.
    pub delivery_count: u32,
}

/// Task-queue boundary.
#[async_trait]
pub trait QueueBackend: Send + Sync + 'static {
    /// Takes the next ready message, if any.
    async fn pull(&self) -> Result<Option<QueueMessage>, BackendError>;

    /// Removes a delivered message.
    async fn ack(&self, handle: &MessageHandle) -> Result<(), BackendError>;

    /// Makes a delivered message available again after `delay`.
    async fn requeue(&self, handle: &MessageHandle, delay: Duration) -> Result<(), BackendError>;

    /// Copies a delivered message to dead-letter storage (it still needs an `ack`).
    async fn dead_letter(&self, handle: &MessageHandle, reason: &str) -> Result<(), BackendError>;
}

/// Pulls from a [`QueueBackend`] and settles every message it pulled.
pub struct QueueAdapter {
    name: String,
    backend: Arc<dyn QueueBackend>,
}

impl QueueAdapter {
    /// Creates an adapter named `queue`.
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            name: "queue".into(),
            backend,
        }
    }

    /// Renames the adapter (shown in logs).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl SourceAdapter for QueueAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Queue
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: AdapterContext) -> Result<(), RuntimeError> {
        let mut in_flight = JoinSet::new();
        let idle = ctx.config.queue_poll_interval;
        let bp = Arc::clone(ctx.dispatcher.backpressure());

        loop {
            let lease = tokio::select! {
                _ = ctx.token.cancelled() => break,
                lease = bp.admit(SourceKind::Queue) => lease,
            };
            let pulled = tokio::select! {
                _ = ctx.token.cancelled() => break,
                pulled = self.backend.pull() => pulled,
            };

            match pulled {
                Ok(Some(msg)) => {
                    let dispatcher = Arc::clone(&ctx.dispatcher);
                    let backend = Arc::clone(&self.backend);
                    let token = ctx.token.clone();
                    in_flight.spawn(process(dispatcher, backend, token, msg, lease));
                }
                Ok(None) => {
                    drop(lease);
                    if !idle_sleep(&ctx.token, idle).await {
                        break;
                    }
                }
                Err(e) => {
                    drop(lease);
                    warn!(adapter = %self.name, error = %e, "queue pull failed");
                    if !idle_sleep(&ctx.token, idle).await {
                        break;
                    }
                }
            }
            while in_flight.try_join_next().is_some() {}
        }

        debug!(adapter = %self.name, pending = in_flight.len(), "queue adapter draining");
        while in_flight.join_next().await.is_some() {}
        Ok(())
    }
}

/// Sleeps `d` unless cancelled first; returns `false` on cancellation.
async fn idle_sleep(token: &CancellationToken, d: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = time::sleep(d) => true,
    }
}

async fn process(
    dispatcher: Arc<Dispatcher>,
    backend: Arc<dyn QueueBackend>,
    token: CancellationToken,
    msg: QueueMessage,
    _lease: SourceLease,
) {
    let mut env = WorkEnvelope::new(
        msg.work_type,
        msg.payload,
        Origin::Queue {
            handle: msg.handle.clone(),
            delivery_count: msg.delivery_count,
        },
    )
    .with_work_id(msg.work_id)
    .with_prior_attempts(msg.delivery_count.saturating_sub(1));

    let retry = dispatcher
        .registry()
        .lookup(env.work_type())
        .map(|r| r.policy().retry)
        .unwrap_or_else(|_| RetryPolicy::never());
    let outcome = dispatcher.submit(&mut env).await;

    // Attempts cut short by shutdown go back to the queue, never to dead letters.
    if token.is_cancelled() && !outcome.is_success() {
        debug!(
            work_type = env.work_type(),
            work_id = %env.work_id(),
            handle = %msg.handle,
            "attempt interrupted by shutdown; returning message to the queue"
        );
        if let Err(e) = backend.requeue(&msg.handle, Duration::ZERO).await {
            warn!(handle = %msg.handle, error = %e, "requeue on shutdown failed; backend will redeliver");
        }
        return;
    }

    if let Err(e) = settle(&dispatcher, backend.as_ref(), &env, &msg.handle, retry, outcome).await {
        warn!(
            work_type = env.work_type(),
            work_id = %env.work_id(),
            handle = %msg.handle,
            error = %e,
            "queue settlement failed; backend will redeliver"
        );
    }
}

async fn settle(
    dispatcher: &Dispatcher,
    backend: &dyn QueueBackend,
    env: &WorkEnvelope,
    handle: &MessageHandle,
    retry: RetryPolicy,
    outcome: Outcome,
) -> Result<(), BackendError> {
    if outcome.is_success() {
        return backend.ack(handle).await;
    }

    let reason = outcome.reason().unwrap_or_default();
    let attempts = env.attempt_count();
    if outcome.is_retryable() && retry.should_retry(attempts) {
        let delay = retry.delay_after(attempts);
        dispatcher.bus().publish(
            Event::new(EventKind::RetryScheduled)
                .with_envelope(env)
                .with_delay(delay)
                .with_reason(reason),
        );
        return backend.requeue(handle, delay).await;
    }

    backend.dead_letter(handle, &reason).await?;
    backend.ack(handle).await?;
    dispatcher.bus().publish(
        Event::new(EventKind::DeadLettered)
            .with_envelope(env)
            .with_reason(reason),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryQueue;
    use crate::config::Config;
    use crate::core::BackpressureController;
    use crate::error::HandlerError;
    use crate::events::Bus;
    use crate::policies::BackoffPolicy;
    use crate::registry::{ExecutionPolicy, HandlerFn, RegistryBuilder};

    fn context(builder: &mut RegistryBuilder) -> AdapterContext {
        let registry = builder.seal();
        let cfg = Config {
            queue_poll_interval: Duration::from_millis(5),
            ..Config::default()
        };
        let bus = Bus::new(256);
        let bp = Arc::new(BackpressureController::new(&registry, &cfg, bus.clone()));
        let token = CancellationToken::new();
        AdapterContext {
            dispatcher: Arc::new(Dispatcher::new(registry, bp, bus, cfg.cancel_grace, token.clone())),
            config: Arc::new(cfg),
            token,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_acks() {
        let mut b = RegistryBuilder::new();
        b.register(
            "ok",
            HandlerFn::arc(|p: Payload, _ctx: CancellationToken| async move { Ok(p) }),
            ExecutionPolicy::default(),
        )
        .unwrap();
        let ctx = context(&mut b);
        let queue = Arc::new(MemoryQueue::new());
        let id = queue.push("ok", Payload::Empty);

        let adapter = QueueAdapter::new(queue.clone());
        let run = tokio::spawn({
            let ctx = ctx.clone();
            async move { adapter.run(ctx).await }
        });
        time::sleep(Duration::from_millis(50)).await;
        ctx.token.cancel();
        run.await.unwrap().unwrap();

        assert_eq!(queue.acked(), vec![id]);
        assert!(queue.dead_letters().is_empty());
        assert!(queue.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_dead_letters_immediately() {
        let mut b = RegistryBuilder::new();
        b.register(
            "bad",
            HandlerFn::arc(|_p: Payload, _ctx: CancellationToken| async move {
                Err(HandlerError::fatal("schema mismatch"))
            }),
            ExecutionPolicy::default().with_retry(RetryPolicy::new(5, BackoffPolicy::fixed(Duration::from_millis(1)))),
        )
        .unwrap();
        let ctx = context(&mut b);
        let queue = Arc::new(MemoryQueue::new());
        let id = queue.push("bad", Payload::Empty);

        let adapter = QueueAdapter::new(queue.clone());
        let run = tokio::spawn({
            let ctx = ctx.clone();
            async move { adapter.run(ctx).await }
        });
        time::sleep(Duration::from_millis(50)).await;
        ctx.token.cancel();
        run.await.unwrap().unwrap();

        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].work_id, id);
        assert_eq!(dead[0].reason, "schema mismatch");
        assert_eq!(queue.deliveries(&id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_work_type_dead_letters() {
        let ctx = context(&mut RegistryBuilder::new());
        let queue = Arc::new(MemoryQueue::new());
        queue.push("ghost", Payload::Empty);

        let adapter = QueueAdapter::new(queue.clone());
        let run = tokio::spawn({
            let ctx = ctx.clone();
            async move { adapter.run(ctx).await }
        });
        time::sleep(Duration::from_millis(50)).await;
        ctx.token.cancel();
        run.await.unwrap().unwrap();

        assert_eq!(queue.dead_letters().len(), 1);
        assert!(queue.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_returns_unfinished_message_to_the_queue() {
        let mut b = RegistryBuilder::new();
        b.register(
            "send_email",
            HandlerFn::arc(|_p: Payload, ctx: CancellationToken| async move {
                ctx.cancelled().await;
                Err(HandlerError::Canceled)
            }),
            ExecutionPolicy::default().with_retry(RetryPolicy::new(1, BackoffPolicy::fixed(Duration::from_millis(1)))),
        )
        .unwrap();
        let ctx = context(&mut b);
        let queue = Arc::new(MemoryQueue::new());
        let id = queue.push("send_email", Payload::bytes("hello"));

        let adapter = QueueAdapter::new(queue.clone());
        let run = tokio::spawn({
            let ctx = ctx.clone();
            async move { adapter.run(ctx).await }
        });
        time::sleep(Duration::from_millis(50)).await;
        ctx.token.cancel();
        run.await.unwrap().unwrap();

        assert!(queue.dead_letters().is_empty());
        assert!(queue.acked().is_empty());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.deliveries(&id), 1);
    }
}
