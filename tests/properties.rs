//! Capacity invariants: concurrency bound, token accounting, idempotent outcomes.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use proptest::prelude::*;
use tokio::time;
use tokio_util::sync::CancellationToken;

use minix_dispatch::{
    Config, ExecutionPolicy, HandlerError, HandlerFn, Origin, Outcome, Payload, RegistryBuilder,
    Runtime, RuntimeBuilder, WorkEnvelope, WorkId,
};

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

fn build(registry: RegistryBuilder) -> Runtime {
    let mut registry = registry;
    RuntimeBuilder::new(Config::default())
        .registry(registry.seal())
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn in_flight_never_exceeds_max_concurrency(
        cap in 1usize..4,
        delays in prop::collection::vec(0u64..40, 1..12),
    ) {
        let rt = paused_runtime();
        let (peak, outstanding) = rt.block_on(async move {
            let current = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let (cur, top) = (Arc::clone(&current), Arc::clone(&peak));

            let mut registry = RegistryBuilder::new();
            registry
                .register(
                    "work",
                    HandlerFn::arc(move |p: Payload, _ctx: CancellationToken| {
                        let (cur, top) = (Arc::clone(&cur), Arc::clone(&top));
                        async move {
                            let now = cur.fetch_add(1, Ordering::SeqCst) + 1;
                            top.fetch_max(now, Ordering::SeqCst);
                            let ms = p.as_json().and_then(|v| v.as_u64()).unwrap_or_default();
                            time::sleep(Duration::from_millis(ms)).await;
                            cur.fetch_sub(1, Ordering::SeqCst);
                            Ok(Payload::Empty)
                        }
                    }),
                    ExecutionPolicy::default().with_max_concurrency(cap),
                )
                .unwrap();
            let runtime = build(registry);
            let requests = runtime.requests();

            let calls = delays.into_iter().map(|ms| {
                let requests = requests.clone();
                async move {
                    requests
                        .call("work", Payload::json(ms.into()), Duration::from_secs(60))
                        .await
                }
            });
            for result in futures::future::join_all(calls).await {
                result.unwrap();
            }
            (peak.load(Ordering::SeqCst), runtime.stats().outstanding())
        });
        prop_assert!(peak <= cap, "peak {} exceeded cap {}", peak, cap);
        prop_assert_eq!(outstanding, 0);
    }
}

#[tokio::test(start_paused = true)]
async fn tokens_return_on_every_failure_mode() {
    let mut registry = RegistryBuilder::new();
    registry
        .register(
            "panics",
            HandlerFn::arc(|_p: Payload, _ctx: CancellationToken| async move {
                if true {
                    panic!("index out of bounds");
                }
                Ok(Payload::Empty)
            }),
            ExecutionPolicy::default(),
        )
        .unwrap();
    registry
        .register(
            "stalls",
            HandlerFn::arc(|_p: Payload, _ctx: CancellationToken| async move {
                // ignores cancellation on purpose
                time::sleep(Duration::from_secs(3600)).await;
                Ok(Payload::Empty)
            }),
            ExecutionPolicy::default().with_timeout(Duration::from_millis(50)),
        )
        .unwrap();
    registry
        .register(
            "fatal",
            HandlerFn::arc(|_p: Payload, _ctx: CancellationToken| async move {
                Err(HandlerError::fatal("bad input"))
            }),
            ExecutionPolicy::default(),
        )
        .unwrap();
    registry
        .register(
            "cooperative",
            HandlerFn::arc(|_p: Payload, ctx: CancellationToken| async move {
                ctx.cancelled().await;
                Err(HandlerError::Canceled)
            }),
            ExecutionPolicy::default().with_timeout(Duration::from_millis(20)),
        )
        .unwrap();
    let runtime = build(registry);
    let dispatcher = runtime.dispatcher();

    let mut env = WorkEnvelope::new("panics", Payload::Empty, Origin::Request);
    assert!(matches!(
        dispatcher.submit(&mut env).await,
        Outcome::FatalFailure { ref reason } if reason.contains("index out of bounds")
    ));

    let mut env = WorkEnvelope::new("stalls", Payload::Empty, Origin::Request);
    assert_eq!(
        dispatcher.submit(&mut env).await,
        Outcome::TimedOut { timeout: Duration::from_millis(50) }
    );

    let mut env = WorkEnvelope::new("fatal", Payload::Empty, Origin::Request);
    assert_eq!(
        dispatcher.submit(&mut env).await,
        Outcome::FatalFailure { reason: "bad input".into() }
    );

    let mut env = WorkEnvelope::new("cooperative", Payload::Empty, Origin::Request);
    assert!(matches!(
        dispatcher.submit(&mut env).await,
        Outcome::TimedOut { .. }
    ));

    let stats = runtime.stats();
    assert_eq!(stats.acquired, 4);
    assert_eq!(stats.released, 4);
    assert!(stats.in_flight.values().all(|n| *n == 0));
}

#[tokio::test]
async fn same_work_twice_yields_same_outcome() {
    let mut registry = RegistryBuilder::new();
    registry
        .register(
            "checksum",
            HandlerFn::arc(|p: Payload, _ctx: CancellationToken| async move {
                let sum: u64 = p.as_bytes().unwrap_or_default().iter().map(|b| u64::from(*b)).sum();
                Ok(Payload::json(sum.into()))
            }),
            ExecutionPolicy::default(),
        )
        .unwrap();
    let runtime = build(registry);
    let dispatcher = runtime.dispatcher();
    let work_id = WorkId::from("order-42");

    let mut first = WorkEnvelope::new("checksum", Payload::bytes("abc"), Origin::Request)
        .with_work_id(work_id.clone());
    let mut again = WorkEnvelope::new("checksum", Payload::bytes("abc"), Origin::Request)
        .with_work_id(work_id);

    let a = dispatcher.submit(&mut first).await;
    let b = dispatcher.submit(&mut again).await;
    assert_eq!(a, Outcome::Success(Payload::json(294.into())));
    assert_eq!(a, b);
}
