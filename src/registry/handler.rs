//! # Handler abstraction.
//!
//! A [`Handler`] processes the payload of one envelope and returns a result
//! payload, a retryable error or a fatal error. It receives a
//! [`CancellationToken`] that is cancelled when the execution times out, the
//! request deadline elapses, or the runtime shuts down.
//!
//! Cancellation is **cooperative and best-effort**: the dispatcher cancels the
//! token, waits a bounded grace period for the handler to return, then aborts
//! the execution and reclaims its capacity. Handlers that never reach an await
//! point cannot be interrupted; they keep running on their worker thread after
//! the `TimedOut` outcome has been reported.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;
use crate::work::Payload;

/// Boxed future returned by [`Handler::call`].
pub type BoxHandlerFuture =
    Pin<Box<dyn Future<Output = Result<Payload, HandlerError>> + Send + 'static>>;

/// Shared handle to a handler.
pub type HandlerRef = Arc<dyn Handler>;

/// # Asynchronous, cancellable processing contract.
///
/// Each call produces a **fresh** future that owns everything it needs, so the
/// dispatcher can run it on its own task and abandon it on timeout.
///
/// # Example
/// ```
/// use tokio_util::sync::CancellationToken;
/// use minix_dispatch::{BoxHandlerFuture, Handler, HandlerError, Payload};
///
/// struct Echo;
///
/// impl Handler for Echo {
///     fn call(&self, payload: Payload, ctx: CancellationToken) -> BoxHandlerFuture {
///         Box::pin(async move {
///             if ctx.is_cancelled() {
///                 return Err(HandlerError::Canceled);
///             }
///             Ok(payload)
///         })
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Starts one execution over `payload`.
    fn call(&self, payload: Payload, ctx: CancellationToken) -> BoxHandlerFuture;
}
