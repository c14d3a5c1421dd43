//! Normalized unit of work and its results.
//!
//! ## Contents
//! - [`WorkEnvelope`] what every source adapter hands to the dispatcher
//! - [`Origin`] / [`SourceKind`] where the work came from, plus ack metadata
//! - [`Payload`] opaque bytes or a structured JSON value
//! - [`Outcome`] terminal result of one execution, consumed by the originating adapter
//!
//! ```text
//! Source Adapter ──► WorkEnvelope ──► Dispatcher ──► Outcome ──► Source Adapter
//!                    (attempt_count += 1 per execution, dispatcher only)
//! ```

mod envelope;
mod outcome;
mod payload;

pub use envelope::{EnvelopeId, MessageHandle, Origin, SourceKind, WorkEnvelope, WorkId};
pub use outcome::Outcome;
pub use payload::Payload;
