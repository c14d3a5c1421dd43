use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{BackpressureController, Dispatcher, Runtime};
use crate::adapters::{
    DeadLetterSink, PeriodicAdapter, QueueAdapter, QueueBackend, SourceAdapter, StreamAdapter,
    StreamBackend,
};
use crate::config::Config;
use crate::error::RuntimeError;
use crate::events::Bus;
use crate::registry::{HandlerRegistry, RegistryBuilder};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::work::Payload;

/// Builder for a [`Runtime`].
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// use minix_dispatch::{
///     adapters::memory::MemoryQueue, Config, ExecutionPolicy, HandlerFn, Payload,
///     RegistryBuilder, RuntimeBuilder,
/// };
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let mut registry = RegistryBuilder::new();
/// registry.register(
///     "resize_image",
///     HandlerFn::arc(|p: Payload, _ctx: CancellationToken| async move { Ok(p) }),
///     ExecutionPolicy::default().with_max_concurrency(2),
/// )?;
///
/// let runtime = RuntimeBuilder::new(Config::default())
///     .registry(registry.seal())
///     .with_queue(Arc::new(MemoryQueue::new()))
///     .build()?;
///
/// let out = runtime.requests().call("resize_image", Payload::Empty, Duration::from_secs(1)).await?;
/// # let _ = out;
/// runtime.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct RuntimeBuilder {
    cfg: Config,
    registry: Option<HandlerRegistry>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl RuntimeBuilder {
    /// Creates a builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            registry: None,
            subscribers: Vec::new(),
            adapters: Vec::new(),
        }
    }

    /// Sets the sealed handler registry (an empty one is used if never set).
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive runtime events through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Adds a source adapter.
    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Adds a [`QueueAdapter`] over `backend`.
    pub fn with_queue(self, backend: Arc<dyn QueueBackend>) -> Self {
        self.with_adapter(Arc::new(QueueAdapter::new(backend)))
    }

    /// Adds a [`StreamAdapter`] over `backend`, dead-lettering into `dead_letters`.
    pub fn with_stream(
        self,
        backend: Arc<dyn StreamBackend>,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        self.with_adapter(Arc::new(StreamAdapter::new(backend, dead_letters)))
    }

    /// Adds a [`PeriodicAdapter`] firing `work_type` with `payload` every `every`.
    pub fn with_periodic(
        self,
        work_type: impl Into<String>,
        payload: Payload,
        every: Duration,
    ) -> Self {
        self.with_adapter(Arc::new(PeriodicAdapter::new(work_type, payload, every)))
    }

    /// Validates the configuration and builds the runtime.
    ///
    /// A work type listed in [`Config::overrides`] runs with the configured
    /// policy; every other work type keeps the policy it was registered with.
    ///
    /// Must be called inside a tokio runtime (subscriber workers are spawned here).
    pub fn build(self) -> Result<Runtime, RuntimeError> {
        self.cfg.validate()?;
        let cfg = Arc::new(self.cfg);
        let registry = self
            .registry
            .unwrap_or_else(|| RegistryBuilder::new().seal())
            .with_overrides(&cfg.overrides);

        let bus = Bus::new(cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        let token = CancellationToken::new();

        let backpressure = Arc::new(BackpressureController::new(&registry, &cfg, bus.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            backpressure,
            bus.clone(),
            cfg.cancel_grace,
            token.clone(),
        ));

        Ok(Runtime::new_internal(
            cfg,
            bus,
            subs,
            dispatcher,
            self.adapters,
            token,
        ))
    }
}
