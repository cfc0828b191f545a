// packages/engine/src/runner/core.rs
//! Runner core: state and operations shared by local and agent mode
//!
//! # Hatch cycle lifecycle
//!
//! ```text
//! start_hatching(count, rate)
//!   ├─ stats.clear()
//!   ├─ new CancellationToken + TaskTracker + worker counter (starts at 0)
//!   ├─ outputs.on_start()            (parallel, joined)
//!   └─ spawn Spawner in background
//!
//! stop()
//!   ├─ outputs.on_stop()             (parallel, joined)
//!   ├─ publish runner:stop
//!   ├─ cancel the cycle token        (spawner + every worker observe it)
//!   └─ rate_limiter.stop()
//!
//! close()                            (once)
//!   ├─ stats.close()
//!   └─ cancel the shutdown token     (ends relay/heartbeat/listener loops)
//! ```

use crate::events::{EventDispatcher, RunnerEvent};
use crate::output::Output;
use crate::runtime::{
    CycleId, HatchCompleteFn, HatchStyle, RateLimiter, SpawnRequest, Spawner, TaskSelector,
    TaskSet,
};
use crate::stats::{StatsCollector, StatsPayload, USER_COUNT_KEY};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Resources of the hatch cycle currently in progress
struct HatchCycle {
    id: CycleId,
    cancel: CancellationToken,
    workers: TaskTracker,
}

/// Shared lifecycle state plus hatch/stop/close
pub struct RunnerCore {
    tasks: TaskSet,
    style: HatchStyle,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    stats: Arc<dyn StatsCollector>,
    outputs: RwLock<Vec<Arc<dyn Output>>>,
    events: Arc<EventDispatcher>,

    /// Launch counter of the latest cycle; every cycle gets a fresh one
    active_workers: RwLock<Arc<AtomicUsize>>,
    hatch_rate: AtomicI64,
    cycles: AtomicU64,
    current: Mutex<Option<HatchCycle>>,
    /// Workers of the most recently stopped cycle
    draining: Mutex<Option<TaskTracker>>,

    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl RunnerCore {
    pub fn new(tasks: TaskSet, stats: Arc<dyn StatsCollector>) -> Self {
        Self {
            tasks,
            style: HatchStyle::default(),
            rate_limiter: None,
            stats,
            outputs: RwLock::new(Vec::new()),
            events: Arc::new(EventDispatcher::new()),
            active_workers: RwLock::new(Arc::new(AtomicUsize::new(0))),
            hatch_rate: AtomicI64::new(0),
            cycles: AtomicU64::new(0),
            current: Mutex::new(None),
            draining: Mutex::new(None),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_hatch_style(mut self, style: HatchStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Share an existing dispatcher instead of the runner's own
    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    pub fn add_output(&self, output: Arc<dyn Output>) {
        self.outputs.write().push(output);
    }

    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    pub fn stats(&self) -> &Arc<dyn StatsCollector> {
        &self.stats
    }

    /// Workers launched by the latest hatch cycle
    pub fn active_workers(&self) -> usize {
        self.active_workers.read().load(Ordering::SeqCst)
    }

    pub fn hatch_rate(&self) -> i64 {
        self.hatch_rate.load(Ordering::SeqCst)
    }

    /// Id of the cycle in progress, if any
    pub fn current_cycle(&self) -> Option<CycleId> {
        self.current.lock().as_ref().map(|cycle| cycle.id)
    }

    /// Token cancelled by [`close`](Self::close)
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn start_rate_limiter(&self) {
        if let Some(limiter) = &self.rate_limiter {
            debug!("Starting rate limiter");
            limiter.start();
        }
    }

    /// Begin a hatch cycle of `count` workers and return its id.
    ///
    /// Callers serialise invocations: agent mode through its listener, local
    /// mode by calling it once.
    pub async fn start_hatching(
        &self,
        count: usize,
        hatch_rate: i64,
        on_complete: Option<HatchCompleteFn>,
    ) -> CycleId {
        info!(
            "Start hatching with spawn count {} and hatch rate {}",
            count, hatch_rate
        );

        self.stats.clear();

        let id = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = self.shutdown.child_token();
        let workers = TaskTracker::new();

        self.hatch_rate.store(hatch_rate, Ordering::SeqCst);
        let active = Arc::new(AtomicUsize::new(0));
        *self.active_workers.write() = Arc::clone(&active);

        let previous = self.current.lock().replace(HatchCycle {
            id,
            cancel: cancel.clone(),
            workers: workers.clone(),
        });
        if let Some(previous) = previous {
            warn!(
                "Hatch cycle {} superseded without stop, cancelling it",
                previous.id
            );
            previous.cancel.cancel();
            previous.workers.close();
        }

        self.outputs_on_start().await;

        let spawner = Spawner::new(
            Arc::new(TaskSelector::new(&self.tasks)),
            self.rate_limiter.clone(),
            active,
            self.style,
        );
        let request = SpawnRequest {
            cycle: id,
            count,
            hatch_rate,
            cancel,
            workers: workers.clone(),
            on_complete,
        };
        workers.spawn(async move {
            let outcome = spawner.spawn(request).await;
            debug!("Hatch cycle {} ramp-up finished: {:?}", id, outcome);
        });

        id
    }

    /// Stop the current hatch cycle; a no-op when none is running.
    ///
    /// Workers are signalled, not joined: a task body in flight finishes
    /// before its worker exits.
    pub async fn stop(&self) {
        let cycle = self.current.lock().take();
        let Some(cycle) = cycle else {
            debug!("Stop requested without an active hatch cycle");
            return;
        };

        self.outputs_on_stop().await;
        self.events.publish(RunnerEvent::Stop);

        cycle.cancel.cancel();
        cycle.workers.close();
        *self.draining.lock() = Some(cycle.workers);

        if let Some(limiter) = &self.rate_limiter {
            limiter.stop();
        }

        info!("Hatch cycle {} stopped", cycle.id);
    }

    /// Wait until the workers of the last stopped cycle have exited.
    ///
    /// Returns false if they are still running after `timeout`.
    pub async fn wait_for_workers(&self, timeout: Duration) -> bool {
        let workers = self.draining.lock().clone();
        let Some(workers) = workers else {
            return true;
        };
        tokio::time::timeout(timeout, workers.wait()).await.is_ok()
    }

    /// Close the runner; returns false if it was already closed
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Runner already closed");
            return false;
        }

        self.stats.close();
        self.shutdown.cancel();
        info!("Runner closed");
        true
    }

    /// Attach the current worker count to a stats report
    pub fn with_user_count(&self, mut report: StatsPayload) -> StatsPayload {
        report.insert(
            USER_COUNT_KEY.to_string(),
            Value::from(self.active_workers() as u64),
        );
        report
    }

    fn snapshot_outputs(&self) -> Vec<Arc<dyn Output>> {
        self.outputs.read().clone()
    }

    async fn outputs_on_start(&self) {
        let outputs = self.snapshot_outputs();
        join_all(outputs.iter().map(|o| o.on_start())).await;
    }

    async fn outputs_on_stop(&self) {
        let outputs = self.snapshot_outputs();
        join_all(outputs.iter().map(|o| o.on_stop())).await;
    }

    /// Deliver a report to every output and wait for all of them
    pub async fn outputs_on_event(&self, data: &StatsPayload) {
        let outputs = self.snapshot_outputs();
        join_all(outputs.iter().map(|o| o.on_event(data))).await;
    }
}
