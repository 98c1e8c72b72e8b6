//! Periodic scheduling of check cycles.
//!
//! Every enabled target owns one timer task. A timer fire spawns a detached
//! task that runs the retry controller and hands the outcome to the sink, so
//! slow targets never hold up the timers of others. A resync diffs the new
//! target list against the armed timers: unchanged targets keep their timer
//! (and phase), changed ones are re-armed, and missing or disabled ones are
//! cancelled. Cancelling a timer never touches a cycle that already started.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::Result;
use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use crate::retry::RetryController;
use crate::store::{ResultSink, TargetRegistry};
use crate::target::{CheckOutcome, Target, TargetId};

/// Error message of an outcome produced by a cycle that panicked
pub const INTERNAL_ERROR: &str = "internal error: check cycle panicked";

/// What to do when a target's timer fires while its previous cycle is still running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlapPolicy {
    /// Drop the fire. At most one cycle per target runs at any time.
    #[default]
    #[serde(rename = "skip")]
    SkipIfBusy,

    /// Start the cycle anyway; outcomes may then arrive out of fire order
    #[serde(rename = "allow")]
    Allow,
}

impl fmt::Display for OverlapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlapPolicy::SkipIfBusy => write!(f, "skip"),
            OverlapPolicy::Allow => write!(f, "allow"),
        }
    }
}

/// What a resync changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncSummary {
    pub armed: usize,
    pub rescheduled: usize,
    pub cancelled: usize,
    pub unchanged: usize,
    /// Targets whose interval cannot be put on a timer
    pub rejected: usize,
}

/// Counts running cycles so callers can wait for them
#[derive(Default)]
struct CycleTracker {
    running: AtomicUsize,
    idle: Notify,
}

impl CycleTracker {
    fn enter(self: &Arc<Self>, busy: Option<Arc<AtomicBool>>) -> CycleGuard {
        self.running.fetch_add(1, Ordering::AcqRel);
        CycleGuard { tracker: self.clone(), busy }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.running.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Releases the target's busy flag and the running count, also when unwinding
struct CycleGuard {
    tracker: Arc<CycleTracker>,
    busy: Option<Arc<AtomicBool>>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        if let Some(busy) = &self.busy {
            busy.store(false, Ordering::Release);
        }
        if self.tracker.running.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}

/// Everything a timer needs to start cycles for its target
#[derive(Clone)]
struct FireContext {
    controller: Arc<RetryController>,
    sink: Arc<dyn ResultSink>,
    tracker: Arc<CycleTracker>,
    overlap: OverlapPolicy,
    busy: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

struct Timer {
    /// Configuration the timer was armed with, frozen for every cycle it fires
    target: Target,
    cancelled: Arc<AtomicBool>,
    shutdown: oneshot::Sender<()>,
    _handle: JoinHandle<()>,
}

impl Timer {
    /// No cycle starts once this returns, except one whose fire already passed
    /// the cancelled check on another worker thread
    fn cancel(self) {
        self.cancelled.store(true, Ordering::Release);
        // The task may already be gone if the runtime is shutting down
        let _ = self.shutdown.send(());
    }
}

#[derive(Default)]
struct TimerSet {
    running: bool,
    timers: HashMap<TargetId, Timer>,
    /// Busy flags outlive timers so a re-armed target still sees its running cycle
    busy: HashMap<TargetId, Arc<AtomicBool>>,
}

/// Owns the timer set and drives check cycles for all enabled targets
pub struct TargetScheduler {
    controller: Arc<RetryController>,
    registry: Arc<dyn TargetRegistry>,
    sink: Arc<dyn ResultSink>,
    overlap: OverlapPolicy,
    tracker: Arc<CycleTracker>,
    timers: Mutex<TimerSet>,
}

impl TargetScheduler {
    pub fn new(
        controller: Arc<RetryController>,
        registry: Arc<dyn TargetRegistry>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            controller,
            registry,
            sink,
            overlap: OverlapPolicy::default(),
            tracker: Arc::new(CycleTracker::default()),
            timers: Mutex::new(TimerSet::default()),
        }
    }

    pub fn with_overlap_policy(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn overlap_policy(&self) -> OverlapPolicy {
        self.overlap
    }

    /// Start scheduling and arm timers for the registry's enabled targets
    pub async fn start(&self) -> Result<ResyncSummary> {
        let mut set = self.timers.lock().await;
        if !set.running {
            set.running = true;
            info!(overlap = %self.overlap, "target scheduler started");
        }

        let targets = self.registry.list_enabled_targets().await?;
        Ok(self.apply(&mut set, targets))
    }

    /// Cancel every timer. Cycles already running finish and still reach the sink.
    pub async fn stop(&self) {
        let mut set = self.timers.lock().await;
        set.running = false;

        let cancelled = set.timers.len();
        for (_, timer) in set.timers.drain() {
            timer.cancel();
        }

        info!(cancelled, in_flight = self.in_flight(), "target scheduler stopped");
    }

    /// Rebuild the timer set from the registry
    pub async fn resync(&self) -> Result<ResyncSummary> {
        // Held across the registry read so concurrent resyncs apply in call order
        let mut set = self.timers.lock().await;
        if !set.running {
            debug!("scheduler is stopped, skipping resync");
            return Ok(ResyncSummary::default());
        }

        let targets = self.registry.list_enabled_targets().await?;
        Ok(self.apply(&mut set, targets))
    }

    /// Replace the timer set with one timer per enabled target in `targets`.
    ///
    /// Ignored while stopped: `start` rebuilds from the registry anyway.
    pub async fn resync_with(&self, targets: Vec<Target>) -> ResyncSummary {
        let mut set = self.timers.lock().await;
        if !set.running {
            debug!("scheduler is stopped, skipping resync");
            return ResyncSummary::default();
        }

        self.apply(&mut set, targets)
    }

    /// Ids of the targets that currently have an armed timer
    pub async fn scheduled_ids(&self) -> Vec<TargetId> {
        let set = self.timers.lock().await;
        let mut ids: Vec<TargetId> = set.timers.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn is_running(&self) -> bool {
        self.timers.lock().await.running
    }

    /// Number of check cycles currently running
    pub fn in_flight(&self) -> usize {
        self.tracker.running.load(Ordering::Acquire)
    }

    /// Wait until no check cycle is running. Combined with `stop` this gives a hard stop.
    pub async fn wait_idle(&self) {
        self.tracker.wait_idle().await;
    }

    fn apply(&self, set: &mut TimerSet, targets: Vec<Target>) -> ResyncSummary {
        // Later duplicates win, so an id never ends up with two timers
        let desired: HashMap<TargetId, Target> =
            targets.into_iter().filter(|t| t.spec.enabled).map(|t| (t.id, t)).collect();

        let mut summary = ResyncSummary::default();

        let stale: Vec<TargetId> =
            set.timers.keys().filter(|id| !desired.contains_key(id)).copied().collect();
        for id in stale {
            if let Some(timer) = set.timers.remove(&id) {
                info!(target_id = %id, "cancelling timer for removed or disabled target");
                timer.cancel();
                summary.cancelled += 1;
            }
        }

        for (id, target) in desired {
            let period = target.interval();
            let first_fire = Instant::now().checked_add(period).filter(|_| !period.is_zero());
            let Some(first_fire) = first_fire else {
                if let Some(old) = set.timers.remove(&id) {
                    old.cancel();
                }
                error!(
                    target_id = %id,
                    interval_s = target.spec.interval_s,
                    "interval cannot be scheduled, target not armed"
                );
                summary.rejected += 1;
                continue;
            };

            match set.timers.get(&id) {
                Some(timer) if timer.target == target => {
                    summary.unchanged += 1;
                    continue;
                }
                Some(_) => {
                    if let Some(old) = set.timers.remove(&id) {
                        old.cancel();
                    }
                    info!(target_id = %id, interval_s = target.spec.interval_s, "rescheduling target");
                    summary.rescheduled += 1;
                }
                None => {
                    info!(target_id = %id, interval_s = target.spec.interval_s, "scheduling target");
                    summary.armed += 1;
                }
            }

            let busy = set.busy.entry(id).or_default().clone();
            let timer = self.spawn_timer(target, busy, first_fire);
            set.timers.insert(id, timer);
        }

        let timers = &set.timers;
        set.busy.retain(|id, busy| timers.contains_key(id) || busy.load(Ordering::Acquire));

        debug!(
            armed = summary.armed,
            rescheduled = summary.rescheduled,
            cancelled = summary.cancelled,
            unchanged = summary.unchanged,
            rejected = summary.rejected,
            "timer set resynced"
        );
        summary
    }

    fn spawn_timer(&self, target: Target, busy: Arc<AtomicBool>, first_fire: Instant) -> Timer {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let ctx = FireContext {
            controller: self.controller.clone(),
            sink: self.sink.clone(),
            tracker: self.tracker.clone(),
            overlap: self.overlap,
            busy,
            cancelled: cancelled.clone(),
        };
        let frozen = target.clone();

        let handle = tokio::spawn(async move {
            // First fire one full interval after arming
            let mut ticker = interval_at(first_fire, frozen.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    // A dropped sender also ends the timer
                    _ = &mut shutdown_rx => {
                        debug!(target_id = %frozen.id, "timer cancelled");
                        break;
                    }
                    _ = ticker.tick() => fire(&frozen, &ctx),
                }
            }
        });

        Timer { target, cancelled, shutdown: shutdown_tx, _handle: handle }
    }
}

fn fire(target: &Target, ctx: &FireContext) {
    if ctx.cancelled.load(Ordering::Acquire) {
        debug!(target_id = %target.id, "timer cancelled, dropping fire");
        return;
    }

    let busy = match ctx.overlap {
        OverlapPolicy::SkipIfBusy => {
            if ctx
                .busy
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                warn!(target_id = %target.id, "previous check cycle still running, skipping this interval");
                return;
            }
            Some(ctx.busy.clone())
        }
        OverlapPolicy::Allow => None,
    };

    let guard = ctx.tracker.enter(busy);
    let controller = ctx.controller.clone();
    let sink = ctx.sink.clone();
    let target = target.clone();

    tokio::spawn(async move {
        let _guard = guard;
        let outcome = run_guarded(&controller, &target).await;

        if let Err(e) = sink.record(&outcome).await {
            error!(target_id = %target.id, error = %e, "failed to record check outcome");
        }
    });
}

/// Run a cycle, turning a panic into a failed outcome so the target keeps its schedule
async fn run_guarded(controller: &RetryController, target: &Target) -> CheckOutcome {
    let start = Instant::now();
    match AssertUnwindSafe(controller.run_cycle(target)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_) => {
            error!(target_id = %target.id, "check cycle panicked");
            CheckOutcome {
                target_id: target.id,
                checked_at: Utc::now(),
                ok: false,
                status: None,
                latency_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                error: Some(INTERNAL_ERROR.to_string()),
            }
        }
    }
}
