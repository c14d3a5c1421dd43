//! End-to-end scenarios over the in-memory backends.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use minix_dispatch::adapters::memory::{MemoryDeadLetters, MemoryQueue, MemoryStream};
use minix_dispatch::{
    BackoffPolicy, Config, ExecutionPolicy, HandlerError, HandlerFn, Payload, RegistryBuilder,
    RetryPolicy, Runtime, RuntimeBuilder,
};

fn fixed_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, BackoffPolicy::fixed(Duration::from_millis(10)))
}

fn fast_config() -> Config {
    Config {
        queue_poll_interval: Duration::from_millis(5),
        grace: Duration::from_secs(5),
        ..Config::default()
    }
}

/// Runs the runtime for `d`, then shuts it down and waits for it.
async fn run_for(runtime: &Runtime, d: Duration) {
    let (res, ()) = tokio::join!(runtime.run(), async {
        time::sleep(d).await;
        runtime.shutdown();
    });
    res.expect("runtime stops cleanly");
}

#[tokio::test(start_paused = true)]
async fn third_request_waits_for_a_free_slot() {
    let t0 = Instant::now();
    let starts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&starts);

    let mut registry = RegistryBuilder::new();
    registry
        .register(
            "resize_image",
            HandlerFn::arc(move |p: Payload, _ctx: CancellationToken| {
                seen.lock().unwrap().push(t0.elapsed());
                async move {
                    time::sleep(Duration::from_millis(100)).await;
                    Ok(p)
                }
            }),
            ExecutionPolicy::default().with_max_concurrency(2),
        )
        .unwrap();
    let runtime = RuntimeBuilder::new(Config::default())
        .registry(registry.seal())
        .build()
        .unwrap();

    let requests = runtime.requests();
    let calls = (0..3).map(|i| {
        let requests = requests.clone();
        async move {
            requests
                .call("resize_image", Payload::bytes(format!("img-{i}")), Duration::from_secs(5))
                .await
        }
    });
    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    let starts = starts.lock().unwrap().clone();
    assert_eq!(
        starts,
        vec![Duration::ZERO, Duration::ZERO, Duration::from_millis(100)]
    );
    assert_eq!(runtime.stats().peak.get("resize_image"), Some(&2));
    assert_eq!(runtime.stats().outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn queue_message_dead_lettered_after_budget() {
    let mut registry = RegistryBuilder::new();
    registry
        .register(
            "send_email",
            HandlerFn::arc(|_p: Payload, _ctx: CancellationToken| async move {
                Err(HandlerError::retryable("smtp 451"))
            }),
            ExecutionPolicy::default().with_retry(fixed_retry(2)),
        )
        .unwrap();
    let queue = Arc::new(MemoryQueue::new());
    let id = queue.push("send_email", Payload::bytes("hi"));

    let runtime = RuntimeBuilder::new(fast_config())
        .registry(registry.seal())
        .with_queue(queue.clone())
        .build()
        .unwrap();
    run_for(&runtime, Duration::from_millis(500)).await;

    assert_eq!(queue.deliveries(&id), 2);
    let dead = queue.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].work_id, id);
    assert_eq!(dead[0].reason, "smtp 451");
    assert_eq!(queue.acked(), vec![id]);
    assert!(queue.is_idle());
}

#[tokio::test(start_paused = true)]
async fn watermark_waits_for_the_failing_offset() {
    let stream = Arc::new(MemoryStream::new());
    stream.append_at(0, 10, "ingest", Payload::bytes("10")).unwrap();
    stream.append_at(0, 11, "ingest", Payload::bytes("11")).unwrap();

    // (offset, committed watermark when the attempt started)
    let observed: Arc<Mutex<Vec<(String, Option<u64>)>>> = Arc::default();
    let log = Arc::clone(&observed);
    let watched = Arc::clone(&stream);
    let mut registry = RegistryBuilder::new();
    registry
        .register(
            "ingest",
            HandlerFn::arc(move |p: Payload, _ctx: CancellationToken| {
                let offset = String::from_utf8_lossy(p.as_bytes().unwrap_or_default()).into_owned();
                let first = {
                    let mut log = log.lock().unwrap();
                    let first = !log.iter().any(|(o, _)| *o == offset);
                    log.push((offset.clone(), watched.committed(0)));
                    first
                };
                async move {
                    if offset == "10" && first {
                        Err(HandlerError::retryable("downstream busy"))
                    } else {
                        Ok(Payload::Empty)
                    }
                }
            }),
            ExecutionPolicy::default().with_retry(fixed_retry(3)),
        )
        .unwrap();

    let runtime = RuntimeBuilder::new(fast_config())
        .registry(registry.seal())
        .with_stream(stream.clone(), Arc::new(MemoryDeadLetters::new()))
        .build()
        .unwrap();
    run_for(&runtime, Duration::from_millis(500)).await;

    assert_eq!(
        *observed.lock().unwrap(),
        vec![
            ("10".to_string(), None),
            ("10".to_string(), None),
            ("11".to_string(), Some(10)),
        ]
    );
    assert_eq!(stream.commits(0), vec![10, 11]);
}
