//! Loading `DispatchSettings` from files layered with environment overrides.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use minix_dispatch::{
    BackoffPolicy, BackoffStrategy, ConfigError, DispatchSettings, ExecutionPolicy,
    ExhaustionPolicy, HandlerError, HandlerFn, JitterPolicy, Payload, RegistryBuilder,
    RequestError, RetryPolicy, RuntimeBuilder,
};

fn write_file(suffix: &str, body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn no_env() -> Option<HashMap<String, String>> {
    Some(HashMap::new())
}

#[test]
fn yaml_file_with_work_type_overrides() {
    let file = write_file(
        ".yaml",
        r#"
runtime:
  grace_ms: 10000
  queue_limit: 32
  on_stream_retry_exhaustion: halt_partition
defaults:
  max_concurrency: 4
  timeout_ms: 2000
  retry:
    max_attempts: 5
    backoff:
      strategy: exponential
      base_ms: 50
      max_ms: 5000
      jitter: true
work_types:
  resize_image:
    max_concurrency: 2
  send_email:
    timeout_ms: 0
    retry:
      max_attempts: 2
"#,
    );

    let cfg = DispatchSettings::load_with_env(Some(file.path()), no_env())
        .unwrap()
        .into_config()
        .unwrap();

    assert_eq!(cfg.grace, Duration::from_secs(10));
    assert_eq!(cfg.queue_limit, 32);
    assert_eq!(cfg.on_stream_retry_exhaustion, ExhaustionPolicy::HaltPartition);

    let resize = cfg.policy_for("resize_image");
    assert_eq!(resize.max_concurrency, 2);
    assert_eq!(resize.timeout, Some(Duration::from_secs(2)));
    assert_eq!(resize.retry.max_attempts, 5);
    assert_eq!(resize.retry.backoff.strategy, BackoffStrategy::Exponential);
    assert_eq!(resize.retry.backoff.jitter, JitterPolicy::Equal);

    let email = cfg.policy_for("send_email");
    assert_eq!(email.max_concurrency, 4);
    assert_eq!(email.timeout, None);
    assert_eq!(email.retry.max_attempts, 2);

    // unknown work types fall back to the defaults
    assert_eq!(cfg.policy_for("anything_else"), cfg.defaults);
}

#[test]
fn environment_wins_over_toml_file() {
    let file = write_file(
        ".toml",
        r#"
[runtime]
grace_ms = 1000
stream_batch_size = 16

[defaults.retry]
max_attempts = 3
"#,
    );
    let env: HashMap<String, String> = [
        ("MINIX_RUNTIME__GRACE_MS", "4000"),
        ("MINIX_DEFAULTS__RETRY__MAX_ATTEMPTS", "7"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect();

    let cfg = DispatchSettings::load_with_env(Some(file.path()), Some(env))
        .unwrap()
        .into_config()
        .unwrap();

    assert_eq!(cfg.grace, Duration::from_secs(4));
    assert_eq!(cfg.stream_batch_size, 16);
    assert_eq!(cfg.defaults.retry.max_attempts, 7);
}

#[test]
fn invalid_policy_is_rejected_with_its_field() {
    let file = write_file(
        ".yaml",
        r#"
work_types:
  resize_image:
    max_concurrency: 0
"#,
    );
    let err = DispatchSettings::load_with_env(Some(file.path()), no_env())
        .unwrap()
        .into_config()
        .unwrap_err();
    match err {
        ConfigError::Invalid { field, .. } => {
            assert_eq!(field, "work_types.resize_image.max_concurrency");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_file_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = DispatchSettings::load_with_env(Some(&dir.path().join("absent.yaml")), no_env())
        .unwrap_err();
    assert_eq!(err.as_label(), "config_load");
}

#[tokio::test(start_paused = true)]
async fn file_overrides_reach_the_running_dispatcher() {
    let file = write_file(
        ".yaml",
        r#"
work_types:
  resize_image:
    max_concurrency: 2
    retry:
      max_attempts: 2
      backoff:
        strategy: fixed
        base_ms: 10
        jitter: false
"#,
    );
    let cfg = DispatchSettings::load_with_env(Some(file.path()), no_env())
        .unwrap()
        .into_config()
        .unwrap();

    let attempts = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&attempts);
    let registered = ExecutionPolicy::default()
        .with_max_concurrency(1)
        .with_retry(RetryPolicy::new(5, BackoffPolicy::fixed(Duration::from_millis(10))));

    let mut registry = RegistryBuilder::new();
    registry
        .register(
            "resize_image",
            HandlerFn::arc(move |_p: Payload, _ctx: CancellationToken| {
                seen.fetch_add(1, Ordering::SeqCst);
                async move { Err(HandlerError::retryable("disk busy")) }
            }),
            registered,
        )
        .unwrap();
    registry
        .register(
            "thumbnail",
            HandlerFn::arc(|p: Payload, _ctx: CancellationToken| async move { Ok(p) }),
            registered,
        )
        .unwrap();
    let runtime = RuntimeBuilder::new(cfg)
        .registry(registry.seal())
        .build()
        .unwrap();

    let backpressure = runtime.dispatcher().backpressure();
    assert_eq!(backpressure.capacity("resize_image"), Some(2));
    // not listed in the file: keeps its registered policy
    assert_eq!(backpressure.capacity("thumbnail"), Some(1));

    let out = runtime
        .requests()
        .call("resize_image", Payload::Empty, Duration::from_secs(5))
        .await;
    assert_eq!(
        out,
        Err(RequestError::Retryable { attempts: 2, reason: "disk busy".into() })
    );
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}
