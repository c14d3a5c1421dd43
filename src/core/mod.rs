//! # Dispatch core.
//!
//! - [`BackpressureController`] per-work-type capacity lanes and per-source admission gates
//! - [`Dispatcher`] routes envelopes to handlers and produces outcomes
//! - [`Runtime`] / [`RuntimeBuilder`] wire everything together and own shutdown
//!
//! Internal: `runner` (one handler execution) and `shutdown` (OS signals).

mod backpressure;
mod builder;
mod dispatcher;
mod runner;
mod runtime;
mod shutdown;

pub use backpressure::{BackpressureController, BackpressureStats, BackpressureToken, SourceLease};
pub use builder::RuntimeBuilder;
pub use dispatcher::Dispatcher;
pub use runtime::Runtime;
