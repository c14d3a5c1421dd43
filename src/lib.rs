//! # minix-dispatch
//!
//! **minix-dispatch** is a unified work-dispatch core for Rust.
//!
//! One handler contract serves three sources of work: synchronous requests,
//! at-least-once task queues and partitioned event streams. Each source has its
//! own adapter that owns acknowledgement semantics; the dispatcher in the middle
//! routes by work type, enforces per-type concurrency and timeouts, and reports
//! a single [`Outcome`] per execution.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  ┌────────────────┐   ┌────────────────┐   ┌────────────────┐
//!  │ RequestAdapter │   │  QueueAdapter  │   │ StreamAdapter  │
//!  │ (call+deadline)│   │ (ack/requeue/  │   │ (per-partition │
//!  │                │   │  dead-letter)  │   │  watermark)    │
//!  └───────┬────────┘   └───────┬────────┘   └───────┬────────┘
//!          │  admit(source)     │                    │
//!          ▼                    ▼                    ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │  BackpressureController                                       │
//! │  - per-source in-flight gates (pause / resume)                │
//! │  - per-work-type FIFO lanes (max_concurrency)                 │
//! └──────────────────────────────┬────────────────────────────────┘
//!                                ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │  Dispatcher                                                   │
//! │  - HandlerRegistry lookup (sealed, read-only)                 │
//! │  - acquire token, run_once(handler, timeout), release token   │
//! │  - exactly one Outcome per execution                          │
//! └──────────────────────────────┬────────────────────────────────┘
//!                                │ publishes
//!                                ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │                 Bus (broadcast channel)                       │
//! │              (capacity: Config::bus_capacity)                 │
//! └──────────────────────────────┬────────────────────────────────┘
//!                                ▼
//!                     ┌────────────────────┐
//!                     │ subscriber_listener│
//!                     │   (in Runtime)     │
//!                     └─────────┬──────────┘
//!                               ▼
//!                         SubscriberSet
//!                     ┌─────────┼─────────┐
//!                     ▼         ▼         ▼
//!                  worker1   worker2   workerN
//! ```
//!
//! ### Dispositions
//! ```text
//! Outcome ─► Request: Ok(payload) / typed RequestError (retry while deadline allows)
//!         ─► Queue:   ack | requeue(backoff) | dead-letter + ack
//!         ─► Stream:  retry in place, then dead-letter or halt partition;
//!                     commit the contiguous completed prefix
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                                  |
//! |-------------------|--------------------------------------------------------------|-----------------------------------------------------|
//! | **Registry**      | Map work types to handlers and execution policies.           | [`RegistryBuilder`], [`Handler`], [`HandlerFn`]     |
//! | **Dispatch**      | Route envelopes, bound concurrency and time.                 | [`Dispatcher`], [`BackpressureController`]          |
//! | **Adapters**      | Per-source acknowledgement semantics.                        | [`RequestAdapter`], [`QueueAdapter`], [`StreamAdapter`] |
//! | **Runtime**       | Run adapters, shut down within a grace period.               | [`Runtime`], [`RuntimeBuilder`]                     |
//! | **Policies**      | Retry budgets, backoff and jitter.                           | [`RetryPolicy`], [`BackoffPolicy`]                  |
//! | **Subscriber API**| Hook into runtime events (logging, metrics).                 | [`Subscribe`], [`Event`]                            |
//! | **Workflows**     | DAGs of work types executed as requests.                     | [`Workflow`], [`WorkflowNode`]                      |
//! | **Periodic work** | Fire a work type on a fixed timer.                           | [`PeriodicAdapter`]                                 |
//! | **Configuration** | Runtime settings from files and `MINIX_*` env variables.     | [`Config`], [`DispatchSettings`]                    |
//!
//! ## Optional features
//! - `logging`: exports the built-in [`LogWriter`] subscriber (enabled by default).
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use minix_dispatch::{Config, ExecutionPolicy, HandlerFn, Payload, RegistryBuilder, RuntimeBuilder};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = RegistryBuilder::new();
//!     registry.register(
//!         "greet",
//!         HandlerFn::arc(|p: Payload, _ctx: CancellationToken| async move {
//!             let name = p.as_json().and_then(|v| v.as_str()).unwrap_or("world").to_owned();
//!             Ok(Payload::bytes(format!("hello, {name}")))
//!         }),
//!         ExecutionPolicy::default().with_timeout(Duration::from_secs(1)),
//!     )?;
//!
//!     let runtime = RuntimeBuilder::new(Config::default())
//!         .registry(registry.seal())
//!         .build()?;
//!
//!     let out = runtime
//!         .requests()
//!         .call("greet", Payload::json("minix".into()), Duration::from_secs(2))
//!         .await?;
//!     assert_eq!(out, Payload::bytes("hello, minix"));
//!
//!     runtime.shutdown();
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod adapters;
mod config;
mod core;
mod error;
mod events;
pub mod logging;
mod policies;
mod registry;
mod subscribers;
mod work;
mod workflow;

// ---- Public re-exports ----

pub use adapters::{
    AdapterContext, DeadLetter, DeadLetterSink, HaltedPartition, PeriodicAdapter, QueueAdapter,
    QueueBackend, QueueMessage, RequestAdapter, SourceAdapter, StreamAdapter, StreamBackend, StreamRecord,
    Watermark,
};
pub use config::{
    BackoffSettings, Config, DispatchSettings, PolicySettings, RetrySettings, RuntimeSettings,
};
pub use core::{
    BackpressureController, BackpressureStats, BackpressureToken, Dispatcher, Runtime,
    RuntimeBuilder, SourceLease,
};
pub use error::{
    BackendError, CapacityError, ConfigError, HandlerError, RegistryError, RequestError,
    RuntimeError, WorkflowError,
};
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, BackoffStrategy, ExhaustionPolicy, JitterPolicy, RetryPolicy};
pub use registry::{
    BoxHandlerFuture, ExecutionPolicy, Handler, HandlerFn, HandlerRef, HandlerRegistry,
    RegistryBuilder, Registration,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use work::{EnvelopeId, MessageHandle, Origin, Outcome, Payload, SourceKind, WorkEnvelope, WorkId};
pub use workflow::{Workflow, WorkflowNode};

// Optional: expose the built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
