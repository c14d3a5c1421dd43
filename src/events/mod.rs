//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish runtime events emitted by the dispatcher, the source adapters,
//! the runtime and subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Dispatcher`, `RequestAdapter`, `QueueAdapter`,
//!   `StreamAdapter`, `BackpressureController` (pause/resume), `Runtime`
//!   (shutdown), `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the runtime's subscriber listener, which fans out to the
//!   [`SubscriberSet`](crate::SubscriberSet).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
