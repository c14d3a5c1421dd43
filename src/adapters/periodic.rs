//! # Periodic adapter: timer-triggered work.
//!
//! ```text
//! interval(every), missed ticks skipped
//!   loop {
//!     ├─► tick (or shutdown → stop)
//!     └─► RequestAdapter::call(work_type, payload, deadline)
//!           Ok        → next tick
//!           Err(e)    → logged, next tick
//!   }
//! ```
//!
//! Firings share the request path: same admission gate, same in-place retry
//! within `deadline`. Ticks missed while a firing runs collapse into one;
//! firings of one adapter never overlap.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use super::{AdapterContext, RequestAdapter, SourceAdapter};
use crate::error::RuntimeError;
use crate::work::{Payload, SourceKind};

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Runs one work type on a fixed period until shutdown.
pub struct PeriodicAdapter {
    name: String,
    work_type: String,
    payload: Payload,
    every: Duration,
    deadline: Duration,
}

impl PeriodicAdapter {
    /// Fires `work_type` with `payload` every `every` (at least 1ms), starting at once.
    ///
    /// Each firing may take up to `every` before the caller-side deadline elapses.
    pub fn new(work_type: impl Into<String>, payload: Payload, every: Duration) -> Self {
        let work_type = work_type.into();
        let every = every.max(MIN_PERIOD);
        Self {
            name: format!("periodic:{work_type}"),
            work_type,
            payload,
            every,
            deadline: every,
        }
    }

    /// Renames the adapter (shown in logs).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the deadline of each firing.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Period between firings.
    pub fn every(&self) -> Duration {
        self.every
    }
}

#[async_trait]
impl SourceAdapter for PeriodicAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Request
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: AdapterContext) -> Result<(), RuntimeError> {
        let requests = RequestAdapter::new(Arc::clone(&ctx.dispatcher));
        let mut ticks = time::interval(self.every);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut fired: u64 = 0;

        loop {
            tokio::select! {
                _ = ctx.token.cancelled() => break,
                _ = ticks.tick() => {}
            }
            fired += 1;
            match requests
                .call(&self.work_type, self.payload.clone(), self.deadline)
                .await
            {
                Ok(_) => debug!(adapter = %self.name, fired, "periodic work done"),
                Err(e) => warn!(
                    adapter = %self.name,
                    fired,
                    error = %e,
                    label = e.as_label(),
                    "periodic work failed"
                ),
            }
        }

        requests.close();
        debug!(adapter = %self.name, fired, "periodic adapter stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::{BackpressureController, Dispatcher};
    use crate::error::HandlerError;
    use crate::events::Bus;
    use crate::registry::{ExecutionPolicy, HandlerFn, RegistryBuilder};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    fn context(builder: &mut RegistryBuilder) -> AdapterContext {
        let registry = builder.seal();
        let cfg = Config::default();
        let bus = Bus::new(256);
        let bp = Arc::new(BackpressureController::new(&registry, &cfg, bus.clone()));
        let token = CancellationToken::new();
        AdapterContext {
            dispatcher: Arc::new(Dispatcher::new(registry, bp, bus, cfg.cancel_grace, token.clone())),
            config: Arc::new(cfg),
            token,
        }
    }

    fn counting(b: &mut RegistryBuilder, calls: &Arc<AtomicU32>, busy: Duration, fail: bool) {
        let calls = Arc::clone(calls);
        b.register(
            "reindex",
            HandlerFn::arc(move |_p: Payload, _ctx: CancellationToken| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    time::sleep(busy).await;
                    if fail {
                        Err(HandlerError::fatal("index locked"))
                    } else {
                        Ok(Payload::Empty)
                    }
                }
            }),
            ExecutionPolicy::default(),
        )
        .unwrap();
    }

    async fn run_for(adapter: PeriodicAdapter, ctx: &AdapterContext, d: Duration) {
        let run = tokio::spawn({
            let ctx = ctx.clone();
            async move { adapter.run(ctx).await }
        });
        time::sleep(d).await;
        ctx.token.cancel();
        run.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn fires_on_every_tick() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut b = RegistryBuilder::new();
        counting(&mut b, &calls, Duration::ZERO, false);
        let ctx = context(&mut b);

        let adapter = PeriodicAdapter::new("reindex", Payload::Empty, Duration::from_millis(100));
        run_for(adapter, &ctx, Duration::from_millis(350)).await;

        // t = 0, 100, 200, 300
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(ctx.dispatcher.backpressure().stats().outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_keep_the_schedule() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut b = RegistryBuilder::new();
        counting(&mut b, &calls, Duration::ZERO, true);
        let ctx = context(&mut b);

        let adapter = PeriodicAdapter::new("reindex", Payload::Empty, Duration::from_millis(100));
        run_for(adapter, &ctx, Duration::from_millis(350)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_firing_skips_missed_ticks() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut b = RegistryBuilder::new();
        counting(&mut b, &calls, Duration::from_millis(250), false);
        let ctx = context(&mut b);

        let adapter = PeriodicAdapter::new("reindex", Payload::Empty, Duration::from_millis(100))
            .with_deadline(Duration::from_secs(1));
        run_for(adapter, &ctx, Duration::from_millis(450)).await;

        // the first firing runs to 250; one late tick fires then, the rest are skipped
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
