//! # Dispatcher: the scheduling core shared by every source adapter.
//!
//! ```text
//! submit(&mut envelope)
//!   ├─► registry.lookup(work_type) ── Err ──► FatalFailure (never dropped)
//!   ├─► deadline already passed? ───── yes ──► TimedOut (handler not run)
//!   ├─► backpressure.acquire(work_type)      (FIFO wait; bounded by deadline/shutdown)
//!   ├─► envelope.begin_attempt(), publish WorkStarting
//!   ├─► run_once(handler, limit = min(timeout, deadline - now))
//!   ├─► token.release()                      (unconditional)
//!   └─► publish WorkSucceeded / WorkFailed, return Outcome
//! ```
//!
//! The dispatcher never decides a terminal disposition: retries, dead letters
//! and caller errors belong to the originating adapter.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::backpressure::{BackpressureController, BackpressureToken};
use super::runner::run_once;
use crate::error::CapacityError;
use crate::events::{Bus, Event, EventKind};
use crate::registry::HandlerRegistry;
use crate::work::{Outcome, WorkEnvelope};

/// Routes envelopes to handlers under per-work-type limits.
pub struct Dispatcher {
    registry: HandlerRegistry,
    backpressure: Arc<BackpressureController>,
    bus: Bus,
    cancel_grace: Duration,
    token: CancellationToken,
}

impl Dispatcher {
    /// Creates a dispatcher over a sealed registry.
    ///
    /// `token` is the parent of every execution's cancellation signal.
    pub fn new(
        registry: HandlerRegistry,
        backpressure: Arc<BackpressureController>,
        bus: Bus,
        cancel_grace: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            registry,
            backpressure,
            bus,
            cancel_grace,
            token,
        }
    }

    /// The sealed registry.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// The shared backpressure controller.
    pub fn backpressure(&self) -> &Arc<BackpressureController> {
        &self.backpressure
    }

    /// The event bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Executes one attempt of `env` and returns its outcome.
    ///
    /// Bumps `env`'s attempt counter when (and only when) the handler is started.
    pub async fn submit(&self, env: &mut WorkEnvelope) -> Outcome {
        let registration = match self.registry.lookup(env.work_type()) {
            Ok(r) => r,
            Err(e) => {
                let outcome = Outcome::fatal(e.to_string());
                self.publish_outcome(env, &outcome);
                return outcome;
            }
        };
        let policy = *registration.policy();

        if env.is_expired() {
            let outcome = Outcome::TimedOut {
                timeout: Duration::ZERO,
            };
            self.publish_outcome(env, &outcome);
            return outcome;
        }

        let mut token = match self.acquire(env).await {
            Ok(token) => token,
            Err(outcome) => {
                self.publish_outcome(env, &outcome);
                return outcome;
            }
        };

        let attempt = env.begin_attempt();
        trace!(work_type = env.work_type(), attempt, "capacity acquired");
        self.bus.publish(Event::new(EventKind::WorkStarting).with_envelope(env));

        let limit = effective_limit(policy.timeout, env.deadline());
        let outcome = run_once(
            registration.handler(),
            env,
            &self.token,
            limit,
            self.cancel_grace,
            &self.bus,
        )
        .await;

        token.release();
        self.publish_outcome(env, &outcome);
        outcome
    }

    /// Non-blocking form: runs [`Dispatcher::submit`] on its own task and hands
    /// the envelope and its outcome to `on_outcome`.
    pub fn submit_with<F>(self: &Arc<Self>, mut env: WorkEnvelope, on_outcome: F) -> JoinHandle<()>
    where
        F: FnOnce(WorkEnvelope, Outcome) + Send + 'static,
    {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = this.submit(&mut env).await;
            on_outcome(env, outcome);
        })
    }

    /// Waits for capacity, bounded by the envelope deadline and runtime shutdown.
    async fn acquire(&self, env: &WorkEnvelope) -> Result<BackpressureToken, Outcome> {
        let acquire = self.backpressure.acquire(env.work_type());
        tokio::pin!(acquire);
        let deadline = async {
            match env.deadline() {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            res = &mut acquire => res.map_err(|e| match e {
                CapacityError::Closed => Outcome::RetryableFailure { reason: "dispatcher closed".into() },
                other => Outcome::fatal(other.to_string()),
            }),
            _ = deadline => {
                debug!(work_type = env.work_type(), "deadline passed while waiting for capacity");
                Err(Outcome::TimedOut { timeout: Duration::ZERO })
            }
            _ = self.token.cancelled() => Err(Outcome::RetryableFailure {
                reason: "dispatcher shutting down".into(),
            }),
        }
    }

    fn publish_outcome(&self, env: &WorkEnvelope, outcome: &Outcome) {
        let ev = match outcome {
            Outcome::Success(_) => Event::new(EventKind::WorkSucceeded),
            failed => Event::new(EventKind::WorkFailed)
                .with_reason(failed.reason().unwrap_or_default()),
        };
        self.bus.publish(ev.with_envelope(env));
    }
}

/// Handler time limit: the policy timeout, shortened to the envelope deadline.
fn effective_limit(timeout: Option<Duration>, deadline: Option<Instant>) -> Option<Duration> {
    let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
    match (timeout, remaining) {
        (Some(t), Some(r)) => Some(t.min(r)),
        (t, r) => t.or(r),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::HandlerError;
    use crate::registry::{ExecutionPolicy, HandlerFn, RegistryBuilder};
    use crate::work::{Origin, Payload};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dispatcher(builder: &mut RegistryBuilder) -> Arc<Dispatcher> {
        let registry = builder.seal();
        let bus = Bus::new(256);
        let bp = Arc::new(BackpressureController::new(&registry, &Config::default(), bus.clone()));
        Arc::new(Dispatcher::new(
            registry,
            bp,
            bus,
            Duration::from_millis(50),
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn unknown_work_type_is_fatal() {
        let d = dispatcher(&mut RegistryBuilder::new());
        let mut env = WorkEnvelope::new("missing", Payload::Empty, Origin::Request);
        let out = d.submit(&mut env).await;
        assert!(matches!(out, Outcome::FatalFailure { ref reason } if reason.contains("unknown work type")));
        assert_eq!(env.attempt_count(), 0);
    }

    #[tokio::test]
    async fn attempts_are_counted_per_execution() {
        let mut b = RegistryBuilder::new();
        b.register(
            "flaky",
            HandlerFn::arc(|_p: Payload, _ctx: CancellationToken| async move {
                Err(HandlerError::retryable("try again"))
            }),
            ExecutionPolicy::default(),
        )
        .unwrap();
        let d = dispatcher(&mut b);
        let mut env = WorkEnvelope::new("flaky", Payload::Empty, Origin::Request);

        assert!(d.submit(&mut env).await.is_retryable());
        assert!(d.submit(&mut env).await.is_retryable());
        assert_eq!(env.attempt_count(), 2);
        assert_eq!(d.backpressure().stats().outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_never_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let mut b = RegistryBuilder::new();
        b.register(
            "t",
            HandlerFn::arc(move |p: Payload, _ctx: CancellationToken| {
                counted.fetch_add(1, Ordering::SeqCst);
                async move { Ok(p) }
            }),
            ExecutionPolicy::default(),
        )
        .unwrap();
        let d = dispatcher(&mut b);
        let mut env = WorkEnvelope::new("t", Payload::Empty, Origin::Request)
            .with_deadline(Instant::now());
        time::advance(Duration::from_millis(1)).await;

        assert!(matches!(d.submit(&mut env).await, Outcome::TimedOut { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_releases_capacity() {
        let mut b = RegistryBuilder::new();
        b.register(
            "slow",
            HandlerFn::arc(|_p: Payload, _ctx: CancellationToken| async move {
                time::sleep(Duration::from_secs(60)).await;
                Ok(Payload::Empty)
            }),
            ExecutionPolicy::default().with_timeout(Duration::from_millis(20)),
        )
        .unwrap();
        let d = dispatcher(&mut b);
        let mut env = WorkEnvelope::new("slow", Payload::Empty, Origin::Request);

        let out = d.submit(&mut env).await;
        assert_eq!(out, Outcome::TimedOut { timeout: Duration::from_millis(20) });
        let stats = d.backpressure().stats();
        assert_eq!((stats.acquired, stats.released), (1, 1));
    }

    #[tokio::test]
    async fn callback_form_hands_back_envelope() {
        let mut b = RegistryBuilder::new();
        b.register(
            "echo",
            HandlerFn::arc(|p: Payload, _ctx: CancellationToken| async move { Ok(p) }),
            ExecutionPolicy::default(),
        )
        .unwrap();
        let d = dispatcher(&mut b);
        let (tx, rx) = tokio::sync::oneshot::channel();
        let env = WorkEnvelope::new("echo", Payload::bytes(b"hi".to_vec()), Origin::Request);

        d.submit_with(env, move |env, outcome| {
            let _ = tx.send((env.attempt_count(), outcome));
        });
        let (attempts, outcome) = rx.await.unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(outcome, Outcome::Success(Payload::bytes(b"hi".to_vec())));
    }

    #[test]
    fn limit_takes_the_tighter_bound() {
        assert_eq!(effective_limit(None, None), None);
        assert_eq!(
            effective_limit(Some(Duration::from_secs(1)), None),
            Some(Duration::from_secs(1))
        );
    }
}
