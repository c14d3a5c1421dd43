//! # Structured logging setup.
//!
//! [`init_tracing`] installs a global `tracing-subscriber` registry with one
//! `fmt` layer (plain or JSON) filtered by `RUST_LOG` (default `info`).
//! Safe to call more than once: only the first call installs anything, and an
//! already-installed global subscriber (e.g. from the host application) is kept.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Output format of the log layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Installs the global tracing subscriber (idempotent).
pub fn init_tracing(format: LogFormat) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let layer = match format {
            LogFormat::Pretty => fmt::layer().with_target(true).with_filter(filter).boxed(),
            LogFormat::Json => fmt::layer()
                .with_target(true)
                .json()
                .with_filter(filter)
                .boxed(),
        };

        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("global tracing subscriber already installed; keeping it");
        }
    });
}
