//! # Backpressure controller: per-work-type capacity and per-source admission.
//!
//! Two independent limits are enforced:
//!
//! ```text
//!   ingestion ──► SourceGate (per source: request / queue / stream)
//!                    │  in-flight envelopes ≤ *_limit, else pause / refuse
//!                    ▼
//!   dispatch  ──► Lane (per work type)
//!                    │  FIFO semaphore with max_concurrency permits
//!                    ▼
//!               BackpressureToken ── released exactly once (explicit or on drop)
//! ```
//!
//! ## Rules
//! - Lane waiters resume in first-acquired-first-resumed order (tokio's
//!   semaphore is fair).
//! - `BackpressureToken::release` is idempotent; dropping a token releases it.
//! - The lane's in-flight gauge is decremented **before** the permit returns,
//!   so the gauge never exceeds `max_concurrency`.
//! - A gate publishes `SourcePaused` when it first refuses an admission and
//!   `SourceResumed` when a lease returns while paused.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::CapacityError;
use crate::events::{Bus, Event, EventKind};
use crate::registry::HandlerRegistry;
use crate::work::SourceKind;

struct Lane {
    work_type: Arc<str>,
    semaphore: Arc<Semaphore>,
    max: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[derive(Default)]
struct Totals {
    acquired: AtomicU64,
    released: AtomicU64,
    idle: Notify,
}

struct SourceGate {
    kind: SourceKind,
    limit: Option<usize>,
    in_flight: AtomicUsize,
    paused: AtomicBool,
    notify: Notify,
}

/// Bounds in-flight work per work type and per source.
pub struct BackpressureController {
    lanes: HashMap<Arc<str>, Arc<Lane>>,
    gates: [Arc<SourceGate>; 3],
    totals: Arc<Totals>,
    bus: Bus,
}

impl BackpressureController {
    /// Creates one lane per registered work type and one gate per source.
    pub fn new(registry: &HandlerRegistry, cfg: &Config, bus: Bus) -> Self {
        let lanes = registry
            .iter()
            .map(|reg| {
                let max = reg.policy().max_concurrency.max(1);
                let work_type: Arc<str> = reg.work_type().into();
                let lane = Lane {
                    work_type: Arc::clone(&work_type),
                    semaphore: Arc::new(Semaphore::new(max)),
                    max,
                    in_flight: AtomicUsize::new(0),
                    peak: AtomicUsize::new(0),
                };
                (work_type, Arc::new(lane))
            })
            .collect();
        let gate = |kind: SourceKind| {
            Arc::new(SourceGate {
                kind,
                limit: cfg.source_limit(kind),
                in_flight: AtomicUsize::new(0),
                paused: AtomicBool::new(false),
                notify: Notify::new(),
            })
        };

        Self {
            lanes,
            gates: SourceKind::ALL.map(gate),
            totals: Arc::new(Totals::default()),
            bus,
        }
    }

    /// Acquires one unit of execution capacity for `work_type`.
    ///
    /// Suspends while the lane is saturated; waiters are resumed in FIFO order.
    pub async fn acquire(&self, work_type: &str) -> Result<BackpressureToken, CapacityError> {
        let lane = self
            .lanes
            .get(work_type)
            .ok_or_else(|| CapacityError::UnknownWorkType {
                work_type: work_type.to_string(),
            })?;
        let permit = Arc::clone(&lane.semaphore)
            .acquire_owned()
            .await
            .map_err(|_closed| CapacityError::Closed)?;

        let now = lane.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        lane.peak.fetch_max(now, Ordering::AcqRel);
        self.totals.acquired.fetch_add(1, Ordering::AcqRel);

        Ok(BackpressureToken {
            permit: Some(permit),
            lane: Arc::clone(lane),
            totals: Arc::clone(&self.totals),
        })
    }

    /// Maximum concurrency of `work_type`, if it has a lane.
    pub fn capacity(&self, work_type: &str) -> Option<usize> {
        self.lanes.get(work_type).map(|l| l.max)
    }

    /// Closes every lane; pending and future `acquire` calls fail with [`CapacityError::Closed`].
    pub fn close(&self) {
        for lane in self.lanes.values() {
            lane.semaphore.close();
        }
        for gate in &self.gates {
            gate.notify.notify_waiters();
        }
    }

    /// True when the source has reached its in-flight limit.
    pub fn is_saturated(&self, kind: SourceKind) -> bool {
        let gate = &self.gates[kind.index()];
        gate.limit
            .is_some_and(|limit| gate.in_flight.load(Ordering::Acquire) >= limit)
    }

    /// Admits one envelope from `kind` without waiting.
    ///
    /// Returns the current in-flight count of the source when saturated.
    pub fn try_admit(&self, kind: SourceKind) -> Result<SourceLease, usize> {
        let gate = &self.gates[kind.index()];
        let mut current = gate.in_flight.load(Ordering::Acquire);
        loop {
            if let Some(limit) = gate.limit {
                if current >= limit {
                    self.mark_paused(gate, current);
                    return Err(current);
                }
            }
            match gate.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(SourceLease {
                        gate: Arc::clone(gate),
                        bus: self.bus.clone(),
                        released: false,
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Admits one envelope from `kind`, waiting for capacity if the source is saturated.
    pub async fn admit(&self, kind: SourceKind) -> SourceLease {
        let gate = &self.gates[kind.index()];
        loop {
            let notified = gate.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_admit(kind) {
                Ok(lease) => return lease,
                Err(_) => notified.await,
            }
        }
    }

    /// Waits until the source is below its limit (returns at once when unlimited).
    pub async fn wait_for_capacity(&self, kind: SourceKind) {
        let gate = &self.gates[kind.index()];
        loop {
            let notified = gate.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_saturated(kind) {
                return;
            }
            self.mark_paused(gate, gate.in_flight.load(Ordering::Acquire));
            notified.await;
        }
    }

    /// Waits until every acquired token has been released.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.totals.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let acquired = self.totals.acquired.load(Ordering::Acquire);
            if self.totals.released.load(Ordering::Acquire) >= acquired {
                return;
            }
            notified.await;
        }
    }

    /// Work types that currently hold capacity, sorted.
    pub fn busy_work_types(&self) -> Vec<String> {
        let mut busy: Vec<String> = self
            .lanes
            .values()
            .filter(|l| l.in_flight.load(Ordering::Acquire) > 0)
            .map(|l| l.work_type.to_string())
            .collect();
        busy.sort();
        busy
    }

    /// Snapshot of token totals and gauges.
    pub fn stats(&self) -> BackpressureStats {
        let mut in_flight = BTreeMap::new();
        let mut peak = BTreeMap::new();
        for lane in self.lanes.values() {
            in_flight.insert(lane.work_type.to_string(), lane.in_flight.load(Ordering::Acquire));
            peak.insert(lane.work_type.to_string(), lane.peak.load(Ordering::Acquire));
        }
        let sources = self
            .gates
            .iter()
            .map(|g| (g.kind, g.in_flight.load(Ordering::Acquire)))
            .collect();

        BackpressureStats {
            acquired: self.totals.acquired.load(Ordering::Acquire),
            released: self.totals.released.load(Ordering::Acquire),
            in_flight,
            peak,
            sources,
        }
    }

    fn mark_paused(&self, gate: &SourceGate, in_flight: usize) {
        if !gate.paused.swap(true, Ordering::AcqRel) {
            info!(source = gate.kind.as_label(), in_flight, "source paused");
            self.bus.publish(
                Event::new(EventKind::SourcePaused)
                    .with_source(gate.kind)
                    .with_reason(format!("in_flight={in_flight}")),
            );
        }
    }
}

/// Lease on one unit of execution capacity of a work type.
///
/// Released exactly once: by [`BackpressureToken::release`] or on drop.
pub struct BackpressureToken {
    permit: Option<OwnedSemaphorePermit>,
    lane: Arc<Lane>,
    totals: Arc<Totals>,
}

impl BackpressureToken {
    /// Returns the capacity to the lane. Releasing twice is a no-op.
    pub fn release(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.lane.in_flight.fetch_sub(1, Ordering::AcqRel);
            self.totals.released.fetch_add(1, Ordering::AcqRel);
            drop(permit);
            self.totals.idle.notify_waiters();
        }
    }

    /// Whether the capacity was already returned.
    pub fn is_released(&self) -> bool {
        self.permit.is_none()
    }

    /// Work type this token belongs to.
    pub fn work_type(&self) -> &str {
        &self.lane.work_type
    }
}

impl Drop for BackpressureToken {
    fn drop(&mut self) {
        self.release();
    }
}

/// Lease on one in-flight slot of a source, held from ingestion until the
/// adapter settles the envelope. Released on drop.
pub struct SourceLease {
    gate: Arc<SourceGate>,
    bus: Bus,
    released: bool,
}

impl SourceLease {
    /// Source this lease counts against.
    pub fn kind(&self) -> SourceKind {
        self.gate.kind
    }
}

impl Drop for SourceLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.gate.in_flight.fetch_sub(1, Ordering::AcqRel);
        if self.gate.paused.swap(false, Ordering::AcqRel) {
            debug!(source = self.gate.kind.as_label(), "source resumed");
            self.bus
                .publish(Event::new(EventKind::SourceResumed).with_source(self.gate.kind));
        }
        self.gate.notify.notify_waiters();
    }
}

/// Point-in-time view of the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackpressureStats {
    /// Tokens handed out since start.
    pub acquired: u64,
    /// Tokens returned since start.
    pub released: u64,
    /// Executions currently holding capacity, per work type.
    pub in_flight: BTreeMap<String, usize>,
    /// Highest in-flight count observed, per work type.
    pub peak: BTreeMap<String, usize>,
    /// Envelopes currently admitted, per source.
    pub sources: Vec<(SourceKind, usize)>,
}

impl BackpressureStats {
    /// Tokens acquired but not yet released.
    pub fn outstanding(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}
