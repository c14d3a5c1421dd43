//! # File/environment form of the configuration.
//!
//! Loaded with the `config` crate: an optional YAML/TOML/JSON file (format by
//! extension) layered under `MINIX_`-prefixed environment variables, nested
//! keys separated by `__` (`MINIX_RUNTIME__GRACE_MS=5000`).
//!
//! Durations are plain milliseconds (`*_ms`); `jitter` is an on/off switch
//! (`true` selects equal jitter). Unset policy fields fall back to `defaults`,
//! then to the built-in [`ExecutionPolicy::default`].
//!
//! ```yaml
//! runtime:
//!   grace_ms: 10000
//!   queue_limit: 32
//!   on_stream_retry_exhaustion: halt_partition
//! defaults:
//!   max_concurrency: 4
//!   timeout_ms: 2000
//!   retry:
//!     max_attempts: 3
//!     backoff: { strategy: exponential, base_ms: 100, max_ms: 5000, jitter: true }
//! work_types:
//!   resize_image:
//!     max_concurrency: 2
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::Config;
use crate::error::ConfigError;
use crate::policies::{BackoffPolicy, BackoffStrategy, ExhaustionPolicy, JitterPolicy, RetryPolicy};
use crate::registry::ExecutionPolicy;

const ENV_PREFIX: &str = "MINIX";

/// Root of the configuration file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Runtime-wide settings.
    pub runtime: RuntimeSettings,
    /// Policy applied to every work type.
    pub defaults: PolicySettings,
    /// Per-work-type overrides, merged field by field over `defaults`.
    pub work_types: BTreeMap<String, PolicySettings>,
}

/// Runtime section. Unset fields keep [`Config::default`] values.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub grace_ms: Option<u64>,
    pub bus_capacity: Option<usize>,
    pub cancel_grace_ms: Option<u64>,
    pub request_limit: Option<usize>,
    pub queue_limit: Option<usize>,
    pub stream_limit: Option<usize>,
    pub queue_poll_interval_ms: Option<u64>,
    pub stream_batch_size: Option<usize>,
    pub partition_buffer: Option<usize>,
    pub on_stream_retry_exhaustion: Option<ExhaustionPolicy>,
}

/// Execution policy of a work type (all fields optional).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    pub max_concurrency: Option<usize>,
    /// `0` disables the timeout.
    pub timeout_ms: Option<u64>,
    pub retry: RetrySettings,
}

/// Retry section of a policy.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: Option<u32>,
    pub backoff: BackoffSettings,
}

/// Backoff section of a retry policy.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub strategy: Option<BackoffStrategy>,
    pub base_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub factor: Option<f64>,
    pub jitter: Option<bool>,
}

impl DispatchSettings {
    /// Loads settings from `path` (if any) layered with `MINIX_*` process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`DispatchSettings::load`], but reads environment overrides from `vars`
    /// instead of the process environment when given.
    pub fn load_with_env(
        path: Option<&Path>,
        vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "loading dispatch settings");
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let env = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(vars);
        let settings = builder.add_source(env).build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Resolves the settings into a validated runtime [`Config`].
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let base = Config::default();
        let rt = self.runtime;
        let defaults = self.defaults.resolve(&ExecutionPolicy::default());

        let mut overrides = HashMap::with_capacity(self.work_types.len());
        for (name, settings) in self.work_types {
            let merged = settings.merged_over(&self.defaults);
            overrides.insert(name, merged.resolve(&ExecutionPolicy::default()));
        }

        let cfg = Config {
            grace: rt.grace_ms.map(Duration::from_millis).unwrap_or(base.grace),
            bus_capacity: rt.bus_capacity.unwrap_or(base.bus_capacity),
            cancel_grace: rt
                .cancel_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(base.cancel_grace),
            request_limit: rt.request_limit.unwrap_or(base.request_limit),
            queue_limit: rt.queue_limit.unwrap_or(base.queue_limit),
            stream_limit: rt.stream_limit.unwrap_or(base.stream_limit),
            queue_poll_interval: rt
                .queue_poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(base.queue_poll_interval),
            stream_batch_size: rt.stream_batch_size.unwrap_or(base.stream_batch_size),
            partition_buffer: rt.partition_buffer.unwrap_or(base.partition_buffer),
            on_stream_retry_exhaustion: rt
                .on_stream_retry_exhaustion
                .unwrap_or(base.on_stream_retry_exhaustion),
            defaults,
            overrides,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

impl PolicySettings {
    /// Fills unset fields of `self` from `fallback`.
    fn merged_over(&self, fallback: &PolicySettings) -> PolicySettings {
        let (b, fb) = (&self.retry.backoff, &fallback.retry.backoff);
        PolicySettings {
            max_concurrency: self.max_concurrency.or(fallback.max_concurrency),
            timeout_ms: self.timeout_ms.or(fallback.timeout_ms),
            retry: RetrySettings {
                max_attempts: self.retry.max_attempts.or(fallback.retry.max_attempts),
                backoff: BackoffSettings {
                    strategy: b.strategy.or(fb.strategy),
                    base_ms: b.base_ms.or(fb.base_ms),
                    max_ms: b.max_ms.or(fb.max_ms),
                    factor: b.factor.or(fb.factor),
                    jitter: b.jitter.or(fb.jitter),
                },
            },
        }
    }

    /// Builds an [`ExecutionPolicy`], taking unset fields from `base`.
    ///
    /// No clamping happens here: out-of-range values are left for validation.
    fn resolve(&self, base: &ExecutionPolicy) -> ExecutionPolicy {
        let b = &self.retry.backoff;
        let base_backoff = base.retry.backoff;
        let backoff = BackoffPolicy {
            strategy: b.strategy.unwrap_or(base_backoff.strategy),
            base: b.base_ms.map(Duration::from_millis).unwrap_or(base_backoff.base),
            max: b.max_ms.map(Duration::from_millis).unwrap_or(base_backoff.max),
            factor: b.factor.unwrap_or(base_backoff.factor),
            jitter: b
                .jitter
                .map(JitterPolicy::from_switch)
                .unwrap_or(base_backoff.jitter),
        };
        let timeout = match self.timeout_ms {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => base.timeout,
        };
        ExecutionPolicy {
            max_concurrency: self.max_concurrency.unwrap_or(base.max_concurrency),
            timeout,
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts.unwrap_or(base.retry.max_attempts),
                backoff,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn empty_sources_give_defaults() {
        let cfg = DispatchSettings::load_with_env(None, env(&[]))
            .unwrap()
            .into_config()
            .unwrap();
        let base = Config::default();
        assert_eq!(cfg.grace, base.grace);
        assert_eq!(cfg.defaults, base.defaults);
        assert!(cfg.overrides.is_empty());
    }

    #[test]
    fn env_overrides_nested_keys() {
        let cfg = DispatchSettings::load_with_env(
            None,
            env(&[
                ("MINIX_RUNTIME__GRACE_MS", "2500"),
                ("MINIX_RUNTIME__ON_STREAM_RETRY_EXHAUSTION", "halt_partition"),
                ("MINIX_DEFAULTS__MAX_CONCURRENCY", "8"),
            ]),
        )
        .unwrap()
        .into_config()
        .unwrap();
        assert_eq!(cfg.grace, Duration::from_millis(2500));
        assert_eq!(cfg.on_stream_retry_exhaustion, ExhaustionPolicy::HaltPartition);
        assert_eq!(cfg.defaults.max_concurrency, 8);
    }

    #[test]
    fn overrides_merge_over_defaults() {
        let mut settings = DispatchSettings::default();
        settings.defaults.timeout_ms = Some(1500);
        settings.defaults.retry.backoff.jitter = Some(true);
        settings.work_types.insert(
            "resize_image".into(),
            PolicySettings {
                max_concurrency: Some(2),
                ..PolicySettings::default()
            },
        );
        let cfg = settings.into_config().unwrap();
        let policy = cfg.policy_for("resize_image");
        assert_eq!(policy.max_concurrency, 2);
        assert_eq!(policy.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(policy.retry.backoff.jitter, JitterPolicy::Equal);
    }

    #[test]
    fn zero_timeout_disables() {
        let mut settings = DispatchSettings::default();
        settings.defaults.timeout_ms = Some(0);
        let cfg = settings.into_config().unwrap();
        assert_eq!(cfg.defaults.timeout, None);
    }

    #[test]
    fn validation_rejects_zero_attempts() {
        let mut settings = DispatchSettings::default();
        settings.defaults.retry.max_attempts = Some(0);
        let err = settings.into_config().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "defaults.retry_policy.max_attempts"));
    }

    #[test]
    fn validation_rejects_inverted_delays() {
        let mut settings = DispatchSettings::default();
        settings.work_types.insert(
            "thumb".into(),
            PolicySettings {
                retry: RetrySettings {
                    max_attempts: None,
                    backoff: BackoffSettings {
                        base_ms: Some(10_000),
                        max_ms: Some(10),
                        ..BackoffSettings::default()
                    },
                },
                ..PolicySettings::default()
            },
        );
        assert!(settings.into_config().is_err());
    }
}
