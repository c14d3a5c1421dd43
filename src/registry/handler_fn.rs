//! # Function-backed handler (`HandlerFn`)
//!
//! [`HandlerFn`] wraps a closure `F: Fn(Payload, CancellationToken) -> Fut`,
//! producing a fresh future per call. No state is shared between executions
//! unless the closure captures an `Arc<...>` explicitly.
//!
//! ## Example
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use minix_dispatch::{HandlerError, HandlerFn, HandlerRef, Payload};
//!
//! let h: HandlerRef = HandlerFn::arc(|payload: Payload, _ctx: CancellationToken| async move {
//!     Ok::<_, HandlerError>(payload)
//! });
//! # let _ = h;
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::handler::{BoxHandlerFuture, Handler};
use crate::error::HandlerError;
use crate::work::Payload;

/// Closure-backed handler.
pub struct HandlerFn<F> {
    f: F,
}

impl<F, Fut> HandlerFn<F>
where
    F: Fn(Payload, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload, HandlerError>> + Send + 'static,
{
    /// Wraps a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps a closure and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Payload, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload, HandlerError>> + Send + 'static,
{
    fn call(&self, payload: Payload, ctx: CancellationToken) -> BoxHandlerFuture {
        Box::pin((self.f)(payload, ctx))
    }
}
