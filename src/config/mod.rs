//! # Configuration.
//!
//! - [`Config`] runtime-wide settings consumed by [`RuntimeBuilder`](crate::RuntimeBuilder)
//!   and the source adapters, plus per-work-type [`ExecutionPolicy`](crate::ExecutionPolicy)
//!   defaults and overrides.
//! - [`DispatchSettings`] the file form, loaded with the `config` crate from a
//!   YAML/TOML file layered with `MINIX_`-prefixed environment variables.
//!
//! ```text
//! dispatch.yaml ─┐
//!                ├─► DispatchSettings::load() ─► into_config() ─► Config ─► RuntimeBuilder
//! MINIX_* env ───┘                                   (validated)
//! ```

mod runtime;
mod settings;

pub use runtime::Config;
pub use settings::{BackoffSettings, DispatchSettings, PolicySettings, RetrySettings, RuntimeSettings};
