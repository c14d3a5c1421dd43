//! # Event subscribers.
//!
//! Subscribers observe runtime [`Event`](crate::Event)s without sitting on the
//! dispatch hot path: each one gets its own bounded queue and worker task.
//!
//! ```text
//! Dispatcher / Adapters ── publish ──► Bus ──► Runtime listener ──► SubscriberSet::emit
//!                                                             ┌─────────┼─────────┐
//!                                                             ▼         ▼         ▼
//!                                                         LogWriter  Metrics   Custom
//! ```
//!
//! ## Implementing a subscriber
//! ```no_run
//! use async_trait::async_trait;
//! use minix_dispatch::{Event, EventKind, Subscribe};
//!
//! struct DeadLetterAlerts;
//!
//! #[async_trait]
//! impl Subscribe for DeadLetterAlerts {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::DeadLettered {
//!             // page someone
//!         }
//!     }
//!     fn name(&self) -> &'static str { "dead-letter-alerts" }
//! }
//! ```

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub(crate) use set::panic_message;
pub use subscribe::Subscribe;
