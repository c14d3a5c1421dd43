//! Handler contract and the sealed handler registry.
//!
//! ## Contents
//! - [`Handler`] the async, cancellable processing contract
//! - [`HandlerFn`] closure-backed handler; [`HandlerRef`] is the shared handle
//! - [`ExecutionPolicy`] per-work-type concurrency, timeout and retry settings
//! - [`RegistryBuilder`] single-threaded registration phase
//! - [`HandlerRegistry`] sealed, read-only lookup shared by the dispatcher
//!
//! ```text
//! RegistryBuilder::register(..)* ──► seal() ──► HandlerRegistry (Arc, lock-free reads)
//!                 └─ register after seal ─► RegistryError::RegistryClosed
//! ```

mod handler;
mod handler_fn;
mod registration;
mod registry;

pub use handler::{BoxHandlerFuture, Handler, HandlerRef};
pub use handler_fn::HandlerFn;
pub use registration::{ExecutionPolicy, Registration};
pub use registry::{HandlerRegistry, RegistryBuilder};
