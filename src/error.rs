//! Error types used by the dispatch runtime, the registry, handlers and adapters.
//!
//! - [`RegistryError`] configuration-time errors raised while building the registry.
//! - [`HandlerError`] errors returned by handlers; always converted into an [`Outcome`](crate::Outcome).
//! - [`RequestError`] the typed error surfaced synchronously to request callers.
//! - [`CapacityError`] failures to acquire execution capacity.
//! - [`BackendError`] failures of queue, stream and dead-letter backends.
//! - [`RuntimeError`] failures of the runtime itself (shutdown, halted partitions).
//! - [`ConfigError`] invalid or unreadable configuration.
//! - [`WorkflowError`] invalid workflow graphs and failed workflow nodes.
//!
//! All of them provide `as_label` (stable snake_case label for logs/metrics).

use std::time::Duration;
use thiserror::Error;

/// # Errors produced while registering or resolving handlers.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A handler is already registered for this work type.
    #[error("duplicate registration for work type '{work_type}'")]
    DuplicateRegistration {
        /// The work type registered twice.
        work_type: String,
    },

    /// The registry was sealed; no further registrations are accepted.
    #[error("registry is sealed; cannot register '{work_type}'")]
    RegistryClosed {
        /// The work type whose registration was refused.
        work_type: String,
    },

    /// No handler is registered for this work type.
    #[error("unknown work type '{work_type}'")]
    UnknownWorkType {
        /// The unresolved work type.
        work_type: String,
    },

    /// The execution policy attached to a registration is unusable.
    #[error("invalid policy for '{work_type}': {reason}")]
    InvalidPolicy {
        /// The work type being registered.
        work_type: String,
        /// What is wrong with the policy.
        reason: String,
    },
}

impl RegistryError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use minix_dispatch::RegistryError;
    ///
    /// let err = RegistryError::UnknownWorkType { work_type: "x".into() };
    /// assert_eq!(err.as_label(), "unknown_work_type");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RegistryError::DuplicateRegistration { .. } => "duplicate_registration",
            RegistryError::RegistryClosed { .. } => "registry_closed",
            RegistryError::UnknownWorkType { .. } => "unknown_work_type",
            RegistryError::InvalidPolicy { .. } => "invalid_policy",
        }
    }
}

/// # Errors returned by handler executions.
///
/// Handlers decide whether a failure is worth retrying. The dispatcher maps:
/// `Retryable` to `RetryableFailure`, `Fatal` to `FatalFailure`, and `Canceled`
/// (observed cancellation) to `TimedOut` when it follows a timeout.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Transient failure; the work may succeed if retried.
    #[error("retryable failure: {reason}")]
    Retryable {
        /// The underlying error message.
        reason: String,
    },

    /// Non-recoverable failure (never retried).
    #[error("fatal failure (no retry): {reason}")]
    Fatal {
        /// The underlying error message.
        reason: String,
    },

    /// Handler observed its cancellation signal and stopped.
    #[error("handler cancelled")]
    Canceled,
}

impl HandlerError {
    /// Builds a [`HandlerError::Retryable`].
    pub fn retryable(reason: impl Into<String>) -> Self {
        HandlerError::Retryable {
            reason: reason.into(),
        }
    }

    /// Builds a [`HandlerError::Fatal`].
    pub fn fatal(reason: impl Into<String>) -> Self {
        HandlerError::Fatal {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            HandlerError::Retryable { .. } => "handler_retryable",
            HandlerError::Fatal { .. } => "handler_fatal",
            HandlerError::Canceled => "handler_canceled",
        }
    }

    /// Indicates whether the error is safe to retry.
    ///
    /// # Example
    /// ```
    /// use minix_dispatch::HandlerError;
    ///
    /// assert!(HandlerError::retryable("boom").is_retryable());
    /// assert!(!HandlerError::fatal("nope").is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Retryable { .. })
    }
}

/// # Errors surfaced to synchronous request callers.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The caller's deadline elapsed before a terminal outcome was reached.
    #[error("request deadline of {deadline:?} elapsed")]
    RequestTimeout {
        /// The deadline the caller asked for.
        deadline: Duration,
    },

    /// Request ingestion is saturated; the request was refused without running.
    #[error("request source saturated ({in_flight} in flight)")]
    Overloaded {
        /// Requests in flight when this one was refused.
        in_flight: usize,
    },

    /// Retries exhausted on a transient failure.
    #[error("retryable failure after {attempts} attempt(s): {reason}")]
    Retryable {
        /// Attempts made.
        attempts: u32,
        /// Last failure message.
        reason: String,
    },

    /// The handler (or routing) failed unrecoverably.
    #[error("fatal failure: {reason}")]
    Fatal {
        /// The failure message.
        reason: String,
    },

    /// Every attempt exceeded the handler timeout.
    #[error("handler timed out after {timeout:?} ({attempts} attempt(s))")]
    HandlerTimeout {
        /// The handler timeout.
        timeout: Duration,
        /// Attempts made.
        attempts: u32,
    },

    /// The runtime is shutting down.
    #[error("dispatcher closed")]
    Closed,
}

impl RequestError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RequestError::RequestTimeout { .. } => "request_timeout",
            RequestError::Overloaded { .. } => "request_overloaded",
            RequestError::Retryable { .. } => "request_retryable",
            RequestError::Fatal { .. } => "request_fatal",
            RequestError::HandlerTimeout { .. } => "request_handler_timeout",
            RequestError::Closed => "request_closed",
        }
    }
}

/// # Errors reported by queue, stream and dead-letter backends.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend is unreachable or refused the operation.
    #[error("backend unavailable: {reason}")]
    Unavailable {
        /// Backend-specific detail.
        reason: String,
    },

    /// The message handle is unknown to the backend (already acked, expired).
    #[error("unknown message handle '{handle}'")]
    UnknownHandle {
        /// The handle.
        handle: String,
    },

    /// The backend refused a commit that would move a watermark backwards.
    #[error("commit for partition {partition} at {offset} is behind watermark {committed}")]
    CommitRegression {
        /// Partition.
        partition: u32,
        /// Offset offered.
        offset: u64,
        /// Offset already committed.
        committed: u64,
    },
}

impl BackendError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BackendError::Unavailable { .. } => "backend_unavailable",
            BackendError::UnknownHandle { .. } => "backend_unknown_handle",
            BackendError::CommitRegression { .. } => "backend_commit_regression",
        }
    }
}

/// # Errors produced by the dispatch runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some work was still in flight.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Work types that still held execution capacity.
        stuck: Vec<String>,
    },

    /// A stream partition exhausted retries under `halt_partition` and stopped.
    #[error("stream partition {partition} halted at offset {offset}: {reason}")]
    PartitionHalted {
        /// Partition that stopped.
        partition: u32,
        /// Offset that could not be processed.
        offset: u64,
        /// Last failure message.
        reason: String,
    },

    /// Configuration could not be applied.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use minix_dispatch::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::PartitionHalted { .. } => "runtime_partition_halted",
            RuntimeError::Config(_) => "runtime_config",
        }
    }
}

/// # Errors returned when acquiring execution capacity.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapacityError {
    /// No capacity lane exists for this work type.
    #[error("no capacity lane for work type '{work_type}'")]
    UnknownWorkType {
        /// The unresolved work type.
        work_type: String,
    },

    /// The controller was closed (runtime shutting down).
    #[error("backpressure controller closed")]
    Closed,
}

impl CapacityError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CapacityError::UnknownWorkType { .. } => "capacity_unknown_work_type",
            CapacityError::Closed => "capacity_closed",
        }
    }
}

/// # Errors raised while loading or validating configuration.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration sources could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value is out of its allowed range.
    #[error("invalid configuration value '{field}': {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Load(_) => "config_load",
            ConfigError::Invalid { .. } => "config_invalid",
        }
    }

    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// # Errors raised while validating or running a workflow.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    /// A node id was added twice.
    #[error("duplicate node id '{node}'")]
    DuplicateNode {
        /// The node id.
        node: String,
    },

    /// A node depends on a node that does not exist.
    #[error("node '{node}' depends on missing node '{dependency}'")]
    MissingDependency {
        /// The dependent node.
        node: String,
        /// The missing dependency.
        dependency: String,
    },

    /// A node lists itself as a dependency.
    #[error("node '{node}' cannot depend on itself")]
    SelfDependency {
        /// The node id.
        node: String,
    },

    /// The graph is not acyclic.
    #[error("workflow contains a cycle through {nodes:?}")]
    Cycle {
        /// Nodes left unresolved by the topological sort.
        nodes: Vec<String>,
    },

    /// The workflow has no nodes.
    #[error("workflow has no nodes")]
    Empty,

    /// A target node id is not part of the workflow.
    #[error("unknown node id '{node}'")]
    UnknownNode {
        /// The node id.
        node: String,
    },

    /// A node's execution failed; the workflow stopped.
    #[error("node '{node}' failed: {source}")]
    NodeFailed {
        /// The failed node.
        node: String,
        /// Why it failed.
        source: RequestError,
    },
}

impl WorkflowError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkflowError::DuplicateNode { .. } => "workflow_duplicate_node",
            WorkflowError::MissingDependency { .. } => "workflow_missing_dependency",
            WorkflowError::SelfDependency { .. } => "workflow_self_dependency",
            WorkflowError::Cycle { .. } => "workflow_cycle",
            WorkflowError::Empty => "workflow_empty",
            WorkflowError::UnknownNode { .. } => "workflow_unknown_node",
            WorkflowError::NodeFailed { .. } => "workflow_node_failed",
        }
    }
}
