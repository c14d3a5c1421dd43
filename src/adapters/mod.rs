//! # Source adapters.
//!
//! Each adapter turns source-specific messages into [`WorkEnvelope`](crate::WorkEnvelope)s,
//! hands them to the [`Dispatcher`], and turns the [`Outcome`](crate::Outcome)
//! back into the source's acknowledgement protocol:
//!
//! | Source  | Success        | Retryable / TimedOut (budget left) | Exhausted / Fatal                    |
//! |---------|----------------|------------------------------------|--------------------------------------|
//! | Request | `Ok(result)`   | retry in place within the deadline | typed [`RequestError`](crate::RequestError) |
//! | Queue   | `ack`          | `requeue(handle, backoff)`         | `dead_letter` + `ack`                |
//! | Stream  | commit watermark | retry in place (partition waits) | dead-letter + commit, or halt partition |
//!
//! [`PeriodicAdapter`] fires a work type on a timer through the request path.
//!
//! Backend boundaries are the [`QueueBackend`], [`StreamBackend`] and
//! [`DeadLetterSink`] traits; [`memory`] provides in-process implementations.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::core::Dispatcher;
use crate::error::RuntimeError;
use crate::work::SourceKind;

mod dead_letter;
pub mod memory;
mod periodic;
mod queue;
mod request;
mod stream;
mod watermark;

pub use dead_letter::{DeadLetter, DeadLetterSink};
pub use periodic::PeriodicAdapter;
pub use queue::{QueueAdapter, QueueBackend, QueueMessage};
pub use request::RequestAdapter;
pub use stream::{HaltedPartition, StreamAdapter, StreamBackend, StreamRecord};
pub use watermark::Watermark;

/// Everything an adapter's ingestion loop needs from the runtime.
#[derive(Clone)]
pub struct AdapterContext {
    /// Shared dispatcher.
    pub dispatcher: Arc<Dispatcher>,
    /// Runtime configuration.
    pub config: Arc<Config>,
    /// Cancelled when the runtime shuts down.
    pub token: CancellationToken,
}

/// Polymorphic source of work.
///
/// `run` drives the adapter's ingestion loop until `ctx.token` is cancelled
/// (or the source is exhausted) and returns once its in-flight work settled.
#[async_trait]
pub trait SourceAdapter: Send + Sync + 'static {
    /// Kind of source this adapter ingests.
    fn kind(&self) -> SourceKind;

    /// Name used in logs.
    fn name(&self) -> &str;

    /// Runs the ingestion loop.
    async fn run(&self, ctx: AdapterContext) -> Result<(), RuntimeError>;
}
