// packages/engine/src/runner/test_support.rs
//! Test doubles shared by the runner tests

use crate::output::Output;
use crate::runtime::{RateLimiter, Task, TaskSet};
use crate::stats::{StatsCollector, StatsPayload};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Two equal-weight tasks that bump `counter` and sleep briefly
pub(crate) fn counting_tasks(counter: Arc<AtomicU64>) -> TaskSet {
    let tasks = ["browse", "checkout"]
        .into_iter()
        .map(|name| {
            let counter = Arc::clone(&counter);
            Task::new(name, 1, move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
        })
        .collect();
    TaskSet::new(tasks).unwrap()
}

/// Poll `condition` for up to two seconds
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Collector whose reports are pushed by the test through `reports`
pub(crate) struct ManualStats {
    pub reports: mpsc::Sender<StatsPayload>,
    receiver: Mutex<Option<mpsc::Receiver<StatsPayload>>>,
    pub starts: AtomicU64,
    pub closes: AtomicU64,
    pub clears: AtomicU64,
}

impl Default for ManualStats {
    fn default() -> Self {
        let (reports, receiver) = mpsc::channel(16);
        Self {
            reports,
            receiver: Mutex::new(Some(receiver)),
            starts: AtomicU64::new(0),
            closes: AtomicU64::new(0),
            clears: AtomicU64::new(0),
        }
    }
}

impl StatsCollector for ManualStats {
    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }

    fn take_reports(&self) -> Option<mpsc::Receiver<StatsPayload>> {
        self.receiver.lock().take()
    }
}

/// Output that records the order of lifecycle calls
#[derive(Default)]
pub(crate) struct RecordingOutput {
    calls: Mutex<Vec<&'static str>>,
    pub events: Mutex<Vec<StatsPayload>>,
}

impl RecordingOutput {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Output for RecordingOutput {
    async fn on_start(&self) {
        self.calls.lock().push("start");
    }

    async fn on_event(&self, data: &StatsPayload) {
        self.calls.lock().push("event");
        self.events.lock().push(data.clone());
    }

    async fn on_stop(&self) {
        self.calls.lock().push("stop");
    }
}

/// Limiter that never blocks and counts start/stop calls
#[derive(Default)]
pub(crate) struct CountingLimiter {
    pub starts: AtomicU64,
    pub stops: AtomicU64,
}

#[async_trait]
impl RateLimiter for CountingLimiter {
    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    async fn acquire(&self) -> bool {
        false
    }
}
