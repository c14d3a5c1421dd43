//! # Runtime: owns the dispatch core, drives source adapters and shutdown.
//!
//! ## Architecture
//! ```text
//! RuntimeBuilder::build()
//!   ├─ Bus ──► listener ──► SubscriberSet::emit (LogWriter, custom subscribers)
//!   ├─ BackpressureController (lanes from the sealed registry, gates from Config)
//!   ├─ Dispatcher (parent token = runtime token)
//!   └─ RequestAdapter (available through Runtime::requests() at once)
//!
//! Runtime::run()
//!   ├─ spawn RequestAdapter::run, QueueAdapter::run, StreamAdapter::run, ...
//!   ├─ wait for OS signal or Runtime::shutdown()
//!   │     └─► publish ShutdownRequested, cancel runtime token
//!   └─ wait up to cfg.grace for adapters to drain and every token to return:
//!         ├─ Ok      → AllStoppedWithin (adapter errors such as PartitionHalted surface here)
//!         └─ timeout → GraceExceeded { stuck work types }
//! ```

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{BackpressureStats, Dispatcher, shutdown};
use crate::adapters::{AdapterContext, RequestAdapter, SourceAdapter};
use crate::config::Config;
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::SubscriberSet;

/// Running dispatch system. Built by [`RuntimeBuilder`](crate::RuntimeBuilder).
pub struct Runtime {
    cfg: Arc<Config>,
    bus: Bus,
    dispatcher: Arc<Dispatcher>,
    requests: RequestAdapter,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    token: CancellationToken,
    listener: JoinHandle<()>,
}

impl Runtime {
    pub(super) fn new_internal(
        cfg: Arc<Config>,
        bus: Bus,
        subs: Arc<SubscriberSet>,
        dispatcher: Arc<Dispatcher>,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        token: CancellationToken,
    ) -> Self {
        let listener = subscriber_listener(&bus, subs);
        Self {
            cfg,
            bus,
            requests: RequestAdapter::new(Arc::clone(&dispatcher)),
            dispatcher,
            adapters,
            token,
            listener,
        }
    }

    /// Handle for synchronous callers.
    pub fn requests(&self) -> RequestAdapter {
        self.requests.clone()
    }

    /// Shared dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Event bus; `subscribe()` to observe runtime events directly.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Runtime configuration.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Backpressure snapshot.
    pub fn stats(&self) -> BackpressureStats {
        self.dispatcher.backpressure().stats()
    }

    /// Requests a graceful shutdown of a running [`Runtime::run`].
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Runs every source adapter until an OS signal or [`Runtime::shutdown`],
    /// then waits up to `grace` for in-flight work to settle.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        let mut set = JoinSet::new();
        self.spawn_adapters(&mut set);
        self.drive_shutdown(&mut set).await
    }

    fn spawn_adapters(&self, set: &mut JoinSet<Result<(), RuntimeError>>) {
        let ctx = AdapterContext {
            dispatcher: Arc::clone(&self.dispatcher),
            config: Arc::clone(&self.cfg),
            token: self.token.clone(),
        };

        let requests = self.requests.clone();
        let request_ctx = ctx.clone();
        set.spawn(async move { requests.run(request_ctx).await });

        for adapter in &self.adapters {
            info!(adapter = adapter.name(), source = %adapter.kind(), "starting source adapter");
            let adapter = Arc::clone(adapter);
            let ctx = ctx.clone();
            set.spawn(async move { adapter.run(ctx).await });
        }
    }

    async fn drive_shutdown(
        &self,
        set: &mut JoinSet<Result<(), RuntimeError>>,
    ) -> Result<(), RuntimeError> {
        tokio::select! {
            signal = os_signal() => info!(signal, "shutdown signal received"),
            _ = self.token.cancelled() => info!("shutdown requested"),
        }
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.token.cancel();
        self.dispatcher.backpressure().close();
        self.wait_all_with_grace(set).await
    }

    /// Waits for adapters to finish and all capacity to return within `grace`.
    ///
    /// Returns the first adapter error, or [`RuntimeError::GraceExceeded`]
    /// listing the work types still holding capacity.
    async fn wait_all_with_grace(
        &self,
        set: &mut JoinSet<Result<(), RuntimeError>>,
    ) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        let mut first_err = None;
        let done = async {
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(Err(e)) if first_err.is_none() => first_err = Some(e),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "source adapter task failed"),
                }
            }
            self.dispatcher.backpressure().wait_idle().await;
        };

        let finished = time::timeout(grace, done).await;
        match finished {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                first_err.map_or(Ok(()), Err)
            }
            Err(_) => {
                set.abort_all();
                let stuck = self.dispatcher.backpressure().busy_work_types();
                self.bus.publish(
                    Event::new(EventKind::GraceExceeded).with_reason(format!("stuck={stuck:?}")),
                );
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.token.cancel();
        self.listener.abort();
    }
}

/// Forwards bus events to the subscriber set (fire-and-forget).
fn subscriber_listener(bus: &Bus, subs: Arc<SubscriberSet>) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => subs.emit(&ev),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber listener lagged behind the bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Resolves on the first OS termination signal; never, if handlers cannot be installed.
async fn os_signal() -> &'static str {
    match shutdown::wait_for_shutdown_signal().await {
        Ok(name) => name,
        Err(e) => {
            warn!(error = %e, "cannot listen for OS signals; waiting for explicit shutdown");
            std::future::pending().await
        }
    }
}
