//! # Request adapter: synchronous calls with a deadline.
//!
//! ```text
//! call(work_type, payload, deadline)
//!   ├─► try_admit(Request) ── saturated ──► Err(Overloaded)   (nothing runs)
//!   ├─► spawn attempt loop ─────────────────────────────────────────┐
//!   │     submit → Retryable/TimedOut with budget and time left?     │
//!   │       yes → RetryScheduled, sleep(backoff), submit again       │
//!   │       no  → terminal outcome                                   │
//!   └─► select (biased)                                              │
//!         ├─ terminal outcome ◄──────────────────────────────────────┘ → Ok / typed error
//!         └─ deadline elapsed → RequestTimedOut, Err(RequestTimeout)
//! ```
//!
//! After the caller's deadline elapses the execution is not awaited further:
//! the dispatcher bounds it by the same deadline, cancels the handler and
//! reclaims its capacity on its own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{AdapterContext, SourceAdapter};
use crate::core::Dispatcher;
use crate::error::{RequestError, RuntimeError};
use crate::events::{Event, EventKind};
use crate::policies::RetryPolicy;
use crate::work::{Origin, Outcome, Payload, SourceKind, WorkEnvelope};

/// Entry point for synchronous callers. Cheap to clone.
#[derive(Clone)]
pub struct RequestAdapter {
    dispatcher: Arc<Dispatcher>,
    closed: CancellationToken,
}

impl RequestAdapter {
    /// Creates an adapter over `dispatcher`.
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            closed: CancellationToken::new(),
        }
    }

    /// Runs `work_type` over `payload` and waits for the result, at most `deadline`.
    pub async fn call(
        &self,
        work_type: &str,
        payload: Payload,
        deadline: Duration,
    ) -> Result<Payload, RequestError> {
        if self.closed.is_cancelled() {
            return Err(RequestError::Closed);
        }
        let lease = self
            .dispatcher
            .backpressure()
            .try_admit(SourceKind::Request)
            .map_err(|in_flight| RequestError::Overloaded { in_flight })?;

        let until = Instant::now() + deadline;
        let env = WorkEnvelope::new(work_type, payload, Origin::Request).with_deadline(until);
        let retry = self
            .dispatcher
            .registry()
            .lookup(work_type)
            .map(|r| r.policy().retry)
            .unwrap_or_else(|_| RetryPolicy::never());

        let dispatcher = Arc::clone(&self.dispatcher);
        let mut execution = tokio::spawn(async move {
            let settled = attempt_loop(&dispatcher, env, retry, until).await;
            drop(lease);
            settled
        });

        tokio::select! {
            biased;
            joined = &mut execution => match joined {
                Ok((outcome, attempts)) => into_result(outcome, attempts, deadline, until),
                Err(e) => Err(RequestError::Fatal { reason: e.to_string() }),
            },
            _ = time::sleep_until(until) => {
                debug!(work_type, ?deadline, "request deadline elapsed");
                self.dispatcher.bus().publish(
                    Event::new(EventKind::RequestTimedOut)
                        .with_work_type(work_type)
                        .with_source(SourceKind::Request)
                        .with_timeout(deadline),
                );
                Err(RequestError::RequestTimeout { deadline })
            }
        }
    }

    /// True once the runtime stopped accepting requests.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Stops accepting new requests; in-flight calls complete normally.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

async fn attempt_loop(
    dispatcher: &Dispatcher,
    mut env: WorkEnvelope,
    retry: RetryPolicy,
    until: Instant,
) -> (Outcome, u32) {
    loop {
        let outcome = dispatcher.submit(&mut env).await;
        let attempts = env.attempt_count();
        if !outcome.is_retryable() || !retry.should_retry(attempts) {
            return (outcome, attempts);
        }
        let delay = retry.delay_after(attempts);
        if Instant::now() + delay >= until {
            return (outcome, attempts);
        }
        dispatcher.bus().publish(
            Event::new(EventKind::RetryScheduled)
                .with_envelope(&env)
                .with_delay(delay)
                .with_reason(outcome.reason().unwrap_or_default()),
        );
        time::sleep(delay).await;
    }
}

fn into_result(
    outcome: Outcome,
    attempts: u32,
    deadline: Duration,
    until: Instant,
) -> Result<Payload, RequestError> {
    match outcome {
        Outcome::Success(result) => Ok(result),
        Outcome::RetryableFailure { reason } => Err(RequestError::Retryable { attempts, reason }),
        Outcome::FatalFailure { reason } => Err(RequestError::Fatal { reason }),
        Outcome::TimedOut { .. } if Instant::now() >= until => {
            Err(RequestError::RequestTimeout { deadline })
        }
        Outcome::TimedOut { timeout } => Err(RequestError::HandlerTimeout { timeout, attempts }),
    }
}

#[async_trait]
impl SourceAdapter for RequestAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Request
    }

    fn name(&self) -> &str {
        "request"
    }

    /// Accepts calls until shutdown, then refuses new ones with [`RequestError::Closed`].
    async fn run(&self, ctx: AdapterContext) -> Result<(), RuntimeError> {
        ctx.token.cancelled().await;
        self.close();
        Ok(())
    }
}
