//! # Handler registry: registration phase, then a sealed read-only map.
//!
//! ## Rules
//! - At most one registration per work type (`DuplicateRegistration`).
//! - Registration is single-threaded at startup ([`RegistryBuilder`] is `&mut`).
//! - [`RegistryBuilder::seal`] freezes the map; later `register` calls fail
//!   with `RegistryClosed`.
//! - [`HandlerRegistry`] is immutable and `Arc`-backed: concurrent lookups need
//!   no synchronization, clones are cheap.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::{ExecutionPolicy, HandlerRef, Registration};
use crate::error::RegistryError;

/// Mutable registration phase.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: HashMap<Arc<str>, Arc<Registration>>,
    sealed: Option<HandlerRegistry>,
}

impl RegistryBuilder {
    /// Creates an empty, open builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handler` to `work_type` with `policy`.
    ///
    /// # Errors
    /// - `RegistryClosed` after [`seal`](Self::seal)
    /// - `DuplicateRegistration` if `work_type` is already bound
    /// - `InvalidPolicy` if the policy is out of range
    pub fn register(
        &mut self,
        work_type: impl Into<Arc<str>>,
        handler: HandlerRef,
        policy: ExecutionPolicy,
    ) -> Result<&mut Self, RegistryError> {
        let work_type: Arc<str> = work_type.into();
        if self.sealed.is_some() {
            return Err(RegistryError::RegistryClosed {
                work_type: work_type.to_string(),
            });
        }
        if self.entries.contains_key(&work_type) {
            return Err(RegistryError::DuplicateRegistration {
                work_type: work_type.to_string(),
            });
        }
        if let Err((field, reason)) = policy.check() {
            return Err(RegistryError::InvalidPolicy {
                work_type: work_type.to_string(),
                reason: format!("{field}: {reason}"),
            });
        }

        debug!(
            work_type = %work_type,
            max_concurrency = policy.max_concurrency,
            timeout = ?policy.timeout,
            max_attempts = policy.retry.max_attempts,
            "handler registered"
        );
        let reg = Registration::new(Arc::clone(&work_type), handler, policy);
        self.entries.insert(work_type, Arc::new(reg));
        Ok(self)
    }

    /// True once sealed.
    pub fn is_sealed(&self) -> bool {
        self.sealed.is_some()
    }

    /// Ends the registration phase and returns the read-only registry.
    ///
    /// Sealing again returns the same registry.
    pub fn seal(&mut self) -> HandlerRegistry {
        if let Some(sealed) = &self.sealed {
            return sealed.clone();
        }
        let sealed = HandlerRegistry {
            entries: Arc::new(std::mem::take(&mut self.entries)),
        };
        self.sealed = Some(sealed.clone());
        sealed
    }
}

/// Sealed registry: work type → registration.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    entries: Arc<HashMap<Arc<str>, Arc<Registration>>>,
}

impl HandlerRegistry {
    /// Resolves the registration for `work_type`.
    ///
    /// # Errors
    /// `UnknownWorkType` when nothing is registered under that name.
    pub fn lookup(&self, work_type: &str) -> Result<Arc<Registration>, RegistryError> {
        self.entries
            .get(work_type)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownWorkType {
                work_type: work_type.to_string(),
            })
    }

    /// Sorted list of registered work types.
    pub fn work_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().map(|k| k.to_string()).collect();
        names.sort_unstable();
        names
    }

    /// Iterates over registrations (unordered).
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Registration>> {
        self.entries.values()
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a registry where each work type listed in `overrides` takes
    /// that policy instead of the one it was registered with.
    ///
    /// Overrides for work types that were never registered are ignored.
    pub(crate) fn with_overrides(&self, overrides: &HashMap<String, ExecutionPolicy>) -> Self {
        if overrides.is_empty() {
            return self.clone();
        }
        let entries = self
            .entries
            .iter()
            .map(|(work_type, reg)| {
                let reg = match overrides.get(&**work_type) {
                    Some(policy) if policy != reg.policy() => {
                        debug!(
                            work_type = %work_type,
                            max_concurrency = policy.max_concurrency,
                            timeout = ?policy.timeout,
                            max_attempts = policy.retry.max_attempts,
                            "policy overridden by configuration"
                        );
                        Arc::new(Registration::new(
                            Arc::clone(work_type),
                            reg.handler().clone(),
                            *policy,
                        ))
                    }
                    _ => Arc::clone(reg),
                };
                (Arc::clone(work_type), reg)
            })
            .collect();
        Self {
            entries: Arc::new(entries),
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("work_types", &self.work_types())
            .finish()
    }
}
