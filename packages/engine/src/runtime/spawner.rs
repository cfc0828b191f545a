// packages/engine/src/runtime/spawner.rs
//! Worker spawner
//!
//! Launches the simulated users of one hatch cycle and runs their task loop.
//!
//! # Ramp-up
//!
//! ```text
//! for each of `count` workers:
//!     cancelled? ──yes──► abort ramp-up (started workers keep running)
//!        │ no
//!     spawn worker, active_workers += 1
//!        │
//!     smooth && rate > 0 ? ──► wait 1s / rate
//! all launched ──► on_complete(cycle)
//! ```
//!
//! # Worker loop
//!
//! ```text
//! loop:
//!     cancelled?          → exit
//!     limiter blocked?    → retry (no task run)
//!     select task, run it with panic containment
//! ```

use crate::runtime::rate_limiter::RateLimiter;
use crate::runtime::selector::TaskSelector;
use crate::runtime::task::Task;
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

/// Monotonic hatch cycle number
pub type CycleId = u64;

/// Ramp-up completion callback, invoked with the cycle that completed
pub type HatchCompleteFn = Box<dyn FnOnce(CycleId) + Send + 'static>;

/// How launches are spread over time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HatchStyle {
    /// Wait `1s / hatch_rate` between launches
    #[default]
    Smooth,
    /// Launch everything back-to-back
    Asap,
}

impl From<&str> for HatchStyle {
    fn from(value: &str) -> Self {
        if value == "smooth" {
            Self::Smooth
        } else {
            Self::Asap
        }
    }
}

/// One ramp-up request
pub struct SpawnRequest {
    pub cycle: CycleId,
    pub count: usize,
    pub hatch_rate: i64,
    pub cancel: CancellationToken,
    /// Tracks the workers of this cycle
    pub workers: TaskTracker,
    pub on_complete: Option<HatchCompleteFn>,
}

/// Result of a ramp-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    Completed { launched: usize },
    Aborted { launched: usize },
}

/// Launches worker contexts for a hatch cycle
#[derive(Clone)]
pub struct Spawner {
    selector: Arc<TaskSelector>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    active_workers: Arc<AtomicUsize>,
    style: HatchStyle,
}

impl Spawner {
    pub fn new(
        selector: Arc<TaskSelector>,
        rate_limiter: Option<Arc<dyn RateLimiter>>,
        active_workers: Arc<AtomicUsize>,
        style: HatchStyle,
    ) -> Self {
        Self {
            selector,
            rate_limiter,
            active_workers,
            style,
        }
    }

    /// Delay between two launches, if any
    pub fn pacing(&self, hatch_rate: i64) -> Option<Duration> {
        match (self.style, u64::try_from(hatch_rate)) {
            (HatchStyle::Smooth, Ok(rate)) if rate > 0 => {
                Some(Duration::from_nanos(1_000_000_000 / rate))
            }
            _ => None,
        }
    }

    /// Ramp up `request.count` workers
    pub async fn spawn(&self, request: SpawnRequest) -> SpawnOutcome {
        let SpawnRequest {
            cycle,
            count,
            hatch_rate,
            cancel,
            workers,
            on_complete,
        } = request;

        info!(
            "Hatching and swarming {} clients at the rate {} clients/s...",
            count, hatch_rate
        );

        let pacing = self.pacing(hatch_rate);

        for launched in 0..count {
            if cancel.is_cancelled() {
                info!(
                    "Hatch cycle {} cancelled after launching {} of {} clients",
                    cycle, launched, count
                );
                return SpawnOutcome::Aborted { launched };
            }

            workers.spawn(run_worker(
                Arc::clone(&self.selector),
                self.rate_limiter.clone(),
                cancel.clone(),
            ));
            self.active_workers.fetch_add(1, Ordering::SeqCst);

            if let Some(delay) = pacing {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        // a stop racing the last launch still counts as an abort
        if cancel.is_cancelled() {
            info!("Hatch cycle {} cancelled at the end of ramp-up", cycle);
            return SpawnOutcome::Aborted { launched: count };
        }

        debug!("Hatch cycle {} launched all {} clients", cycle, count);
        if let Some(on_complete) = on_complete {
            on_complete(cycle);
        }

        SpawnOutcome::Completed { launched: count }
    }
}

async fn run_worker(
    selector: Arc<TaskSelector>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    cancel: CancellationToken,
) {
    let mut rng = StdRng::from_entropy();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let blocked = match &rate_limiter {
            Some(limiter) => limiter.acquire().await,
            None => false,
        };

        if !blocked {
            execute(selector.select(&mut rng)).await;
        }

        // task bodies that never await would otherwise pin this thread
        tokio::task::yield_now().await;
    }
}

/// Run one task invocation, containing any panic it raises
pub async fn execute(task: &Task) {
    let outcome = AssertUnwindSafe(async { task.run().await })
        .catch_unwind()
        .await;

    if let Err(panic) = outcome {
        error!(
            task = %task.name,
            "Task panicked: {}\n{}",
            panic_message(panic.as_ref()),
            Backtrace::force_capture()
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
