//! # Run a single execution of a handler.
//!
//! Executes one attempt on its own task with an optional time limit and folds
//! every exit path into an [`Outcome`].
//!
//! ## Event flow
//!
//! ```text
//! Return:
//!   handler.call() → Ok / Err(Retryable|Fatal|Canceled) → mapped outcome
//!
//! Panic:
//!   handler task panics → FatalFailure("handler panicked: ...")
//!
//! Timeout:
//!   limit exceeded → cancel child → publish TimeoutHit
//!                  → wait up to cancel_grace for the handler to return
//!                  → abort the task if it did not
//!                  → TimedOut
//! ```
//!
//! ## Rules
//! - Derives a **child token** per execution; cancelling it never affects the parent
//! - The handler task is aborted if this future is dropped before it finishes
//! - `TimedOut` is reported even if the handler ignores cancellation

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::HandlerError;
use crate::events::{Bus, Event, EventKind};
use crate::registry::HandlerRef;
use crate::subscribers::panic_message;
use crate::work::{Outcome, Payload, WorkEnvelope};

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<Result<Payload, HandlerError>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Executes one attempt of `handler` over the envelope's payload.
pub(crate) async fn run_once(
    handler: &HandlerRef,
    env: &WorkEnvelope,
    parent: &CancellationToken,
    limit: Option<Duration>,
    cancel_grace: Duration,
    bus: &Bus,
) -> Outcome {
    let child = parent.child_token();
    let mut task = AbortOnDrop(tokio::spawn(
        handler.call(env.payload().clone(), child.clone()),
    ));

    let Some(limit) = limit else {
        return settle((&mut task.0).await, parent);
    };

    match time::timeout(limit, &mut task.0).await {
        Ok(joined) => settle(joined, parent),
        Err(_elapsed) => {
            child.cancel();
            bus.publish(
                Event::new(EventKind::TimeoutHit)
                    .with_envelope(env)
                    .with_timeout(limit),
            );
            if time::timeout(cancel_grace, &mut task.0).await.is_err() {
                warn!(
                    work_type = env.work_type(),
                    work_id = %env.work_id(),
                    ?cancel_grace,
                    "handler ignored cancellation; aborting execution"
                );
            }
            Outcome::TimedOut { timeout: limit }
        }
    }
}

fn settle(
    joined: Result<Result<Payload, HandlerError>, tokio::task::JoinError>,
    parent: &CancellationToken,
) -> Outcome {
    match joined {
        Ok(Ok(result)) => Outcome::Success(result),
        Ok(Err(HandlerError::Retryable { reason })) => Outcome::RetryableFailure { reason },
        Ok(Err(HandlerError::Fatal { reason })) => Outcome::FatalFailure { reason },
        Ok(Err(HandlerError::Canceled)) => Outcome::RetryableFailure {
            reason: if parent.is_cancelled() {
                "handler canceled by shutdown".into()
            } else {
                "handler canceled".into()
            },
        },
        Err(e) if e.is_panic() => Outcome::fatal(format!(
            "handler panicked: {}",
            panic_message(&*e.into_panic())
        )),
        Err(_aborted) => Outcome::RetryableFailure {
            reason: "handler task aborted".into(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HandlerFn;
    use crate::work::Origin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn env() -> WorkEnvelope {
        WorkEnvelope::new("t", Payload::json(serde_json::json!({"n": 1})), Origin::Request)
    }

    #[tokio::test]
    async fn success_returns_payload() {
        let h: HandlerRef = HandlerFn::arc(|p: Payload, _ctx| async move { Ok(p) });
        let out = run_once(&h, &env(), &CancellationToken::new(), None, Duration::ZERO, &Bus::new(8)).await;
        assert_eq!(out, Outcome::Success(Payload::json(serde_json::json!({"n": 1}))));
    }

    #[tokio::test]
    async fn errors_are_classified() {
        let retry: HandlerRef =
            HandlerFn::arc(|_p, _ctx| async move { Err(HandlerError::retryable("flaky")) });
        let fatal: HandlerRef =
            HandlerFn::arc(|_p, _ctx| async move { Err(HandlerError::fatal("bad input")) });
        let token = CancellationToken::new();
        let bus = Bus::new(8);

        let out = run_once(&retry, &env(), &token, None, Duration::ZERO, &bus).await;
        assert!(matches!(out, Outcome::RetryableFailure { ref reason } if reason == "flaky"));
        let out = run_once(&fatal, &env(), &token, None, Duration::ZERO, &bus).await;
        assert!(matches!(out, Outcome::FatalFailure { ref reason } if reason == "bad input"));
    }

    #[tokio::test]
    async fn panic_becomes_fatal() {
        let h: HandlerRef = HandlerFn::arc(|_p, _ctx| async move {
            if true {
                panic!("kaboom");
            }
            Ok(Payload::Empty)
        });
        let out = run_once(&h, &env(), &CancellationToken::new(), None, Duration::ZERO, &Bus::new(8)).await;
        assert!(matches!(out, Outcome::FatalFailure { ref reason } if reason.contains("kaboom")));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_child_and_reports() {
        let observed = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&observed);
        let h: HandlerRef = HandlerFn::arc(move |_p, ctx: CancellationToken| {
            let seen = Arc::clone(&seen);
            async move {
                ctx.cancelled().await;
                seen.store(true, Ordering::SeqCst);
                Err(HandlerError::Canceled)
            }
        });
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        let parent = CancellationToken::new();

        let out = run_once(&h, &env(), &parent, Some(Duration::from_millis(50)), Duration::from_secs(1), &bus).await;

        assert_eq!(out, Outcome::TimedOut { timeout: Duration::from_millis(50) });
        assert!(observed.load(Ordering::SeqCst));
        assert!(!parent.is_cancelled());
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::TimeoutHit);
    }

    #[tokio::test(start_paused = true)]
    async fn stubborn_handler_is_abandoned_after_grace() {
        let h: HandlerRef = HandlerFn::arc(|_p, _ctx| async move {
            time::sleep(Duration::from_secs(3600)).await;
            Ok(Payload::Empty)
        });
        let started = time::Instant::now();
        let out = run_once(
            &h,
            &env(),
            &CancellationToken::new(),
            Some(Duration::from_millis(10)),
            Duration::from_millis(100),
            &Bus::new(8),
        )
        .await;
        assert!(matches!(out, Outcome::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
