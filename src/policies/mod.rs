//! Retry, backoff and exhaustion policies.
//!
//! This module groups the knobs that control **whether** failed work is retried,
//! **how long** to wait between attempts, and **what happens** to stream work
//! once retries run out.
//!
//! ## Contents
//! - [`RetryPolicy`]      attempt budget (`max_attempts`) plus backoff
//! - [`BackoffPolicy`]    how retry delays evolve (fixed or exponential, capped)
//! - [`JitterPolicy`]     randomization strategy to avoid thundering herd
//! - [`ExhaustionPolicy`] stream disposition on retry exhaustion (dead-letter or halt)
//!
//! ## Quick wiring
//! ```text
//! ExecutionPolicy { max_concurrency, timeout, retry: RetryPolicy }
//!      └─► adapters use:
//!           - retry.should_retry(attempts) to decide requeue/retry vs terminal
//!           - retry.delay_after(attempts)  to schedule the next attempt
//! ```
//!
//! ## Defaults
//! - `RetryPolicy::default()` → max_attempts=3, exponential backoff.
//! - `BackoffPolicy::default()` → base=100ms, factor=2.0, max=30s, jitter=None.
//! - `ExhaustionPolicy::DeadLetter`.

mod backoff;
mod exhaustion;
mod jitter;
mod retry;

pub use backoff::{BackoffPolicy, BackoffStrategy};
pub use exhaustion::ExhaustionPolicy;
pub use jitter::JitterPolicy;
pub use retry::RetryPolicy;
