// packages/engine/src/stats/request_stats.rs
//! Request statistics collector
//!
//! Task bodies record request outcomes through a cheap, non-blocking handle;
//! a background aggregator folds them into per-endpoint entries and flushes
//! one report per interval. The record buffer is bounded: when it is full,
//! records are dropped and the count is logged at the next flush.
//!
//! ```text
//! task → record_success()/record_failure() → channel → Aggregator
//!                                                        │ every report_interval
//!                                                        ▼
//!                                             report stream → runner relay
//! ```

use crate::stats::{StatsCollector, StatsPayload};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reports buffered between the aggregator and the relay
const REPORT_BUFFER: usize = 100;

/// Records buffered between task bodies and the aggregator
pub const RECORD_BUFFER: usize = 10_000;

/// Aggregated numbers for one `(method, name)` pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsEntry {
    pub name: String,
    pub method: String,
    pub num_requests: u64,
    pub num_failures: u64,
    /// Milliseconds
    pub total_response_time: i64,
    pub min_response_time: i64,
    pub max_response_time: i64,
    pub total_content_length: i64,
}

impl StatsEntry {
    fn new(method: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            method: method.to_string(),
            ..Default::default()
        }
    }

    fn log(&mut self, response_time: i64, content_length: i64) {
        if self.num_requests == 0 {
            self.min_response_time = response_time;
            self.max_response_time = response_time;
        } else {
            self.min_response_time = self.min_response_time.min(response_time);
            self.max_response_time = self.max_response_time.max(response_time);
        }
        self.num_requests += 1;
        self.total_response_time += response_time;
        self.total_content_length += content_length;
    }

    pub fn avg_response_time(&self) -> f64 {
        if self.num_requests == 0 {
            0.0
        } else {
            self.total_response_time as f64 / self.num_requests as f64
        }
    }

    pub fn avg_content_length(&self) -> i64 {
        if self.num_requests == 0 {
            0
        } else {
            self.total_content_length / self.num_requests as i64
        }
    }
}

/// Occurrences of one distinct failure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorEntry {
    pub name: String,
    pub method: String,
    pub error: String,
    pub occurrences: u64,
}

#[derive(Debug)]
enum Record {
    Success {
        method: String,
        name: String,
        response_time: i64,
        content_length: i64,
    },
    Failure {
        method: String,
        name: String,
        response_time: i64,
        error: String,
    },
}

#[derive(Default)]
struct Aggregate {
    entries: HashMap<(String, String), StatsEntry>,
    total: StatsEntry,
    errors: HashMap<String, ErrorEntry>,
}

impl Aggregate {
    fn new() -> Self {
        Self {
            total: StatsEntry::new("", "Total"),
            ..Default::default()
        }
    }

    fn entry(&mut self, method: &str, name: &str) -> &mut StatsEntry {
        self.entries
            .entry((method.to_string(), name.to_string()))
            .or_insert_with(|| StatsEntry::new(method, name))
    }

    fn apply(&mut self, record: Record) {
        match record {
            Record::Success {
                method,
                name,
                response_time,
                content_length,
            } => {
                self.entry(&method, &name).log(response_time, content_length);
                self.total.log(response_time, content_length);
            }
            Record::Failure {
                method,
                name,
                response_time,
                error,
            } => {
                let entry = self.entry(&method, &name);
                entry.log(response_time, 0);
                entry.num_failures += 1;
                self.total.log(response_time, 0);
                self.total.num_failures += 1;

                let key = format!("{}.{}.{}", method, name, error);
                self.errors
                    .entry(key)
                    .or_insert_with(|| ErrorEntry {
                        name,
                        method,
                        error,
                        occurrences: 0,
                    })
                    .occurrences += 1;
            }
        }
    }

    /// Produce a report and start a fresh window
    fn flush(&mut self) -> StatsPayload {
        let done = std::mem::replace(self, Self::new());

        let mut entries: Vec<StatsEntry> = done.entries.into_values().collect();
        entries.sort_by(|a, b| (&a.name, &a.method).cmp(&(&b.name, &b.method)));

        let mut payload = StatsPayload::new();
        payload.insert("stats".to_string(), to_value(&entries));
        payload.insert("stats_total".to_string(), to_value(&done.total));
        payload.insert(
            "errors".to_string(),
            Value::Object(
                done.errors
                    .into_iter()
                    .map(|(key, entry)| (key, to_value(&entry)))
                    .collect(),
            ),
        );
        payload
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Channel-backed [`StatsCollector`]
pub struct RequestStats {
    records_tx: mpsc::Sender<Record>,
    records_rx: Mutex<Option<mpsc::Receiver<Record>>>,
    dropped: Arc<AtomicU64>,
    reports_tx: mpsc::Sender<StatsPayload>,
    reports_rx: Mutex<Option<mpsc::Receiver<StatsPayload>>>,
    clear: Arc<Notify>,
    shutdown: CancellationToken,
    report_interval: Duration,
}

impl RequestStats {
    pub fn new(report_interval: Duration) -> Self {
        Self::with_capacity(report_interval, RECORD_BUFFER)
    }

    /// Collector buffering at most `capacity` unaggregated records
    pub fn with_capacity(report_interval: Duration, capacity: usize) -> Self {
        let (records_tx, records_rx) = mpsc::channel(capacity.max(1));
        let (reports_tx, reports_rx) = mpsc::channel(REPORT_BUFFER);

        Self {
            records_tx,
            records_rx: Mutex::new(Some(records_rx)),
            dropped: Arc::new(AtomicU64::new(0)),
            reports_tx,
            reports_rx: Mutex::new(Some(reports_rx)),
            clear: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            report_interval,
        }
    }

    /// Record a successful request (response time in milliseconds)
    pub fn record_success(
        &self,
        method: &str,
        name: &str,
        response_time: i64,
        content_length: i64,
    ) {
        self.submit(Record::Success {
            method: method.to_string(),
            name: name.to_string(),
            response_time,
            content_length,
        });
    }

    /// Record a failed request (response time in milliseconds)
    pub fn record_failure(
        &self,
        method: &str,
        name: &str,
        response_time: i64,
        error: impl Into<String>,
    ) {
        self.submit(Record::Failure {
            method: method.to_string(),
            name: name.to_string(),
            response_time,
            error: error.into(),
        });
    }

    fn submit(&self, record: Record) {
        match self.records_tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Stats collector closed, dropping record");
            }
        }
    }
}

impl StatsCollector for RequestStats {
    fn start(&self) {
        let Some(records) = self.records_rx.lock().take() else {
            warn!("Stats collector already started");
            return;
        };

        info!(
            "Starting stats aggregator (report every {:?})",
            self.report_interval
        );

        tokio::spawn(aggregate(
            records,
            Arc::clone(&self.dropped),
            self.reports_tx.clone(),
            Arc::clone(&self.clear),
            self.shutdown.clone(),
            self.report_interval,
        ));
    }

    fn close(&self) {
        self.shutdown.cancel();
    }

    fn clear(&self) {
        self.clear.notify_one();
    }

    fn take_reports(&self) -> Option<mpsc::Receiver<StatsPayload>> {
        self.reports_rx.lock().take()
    }
}

async fn aggregate(
    mut records: mpsc::Receiver<Record>,
    dropped: Arc<AtomicU64>,
    reports: mpsc::Sender<StatsPayload>,
    clear: Arc<Notify>,
    shutdown: CancellationToken,
    report_interval: Duration,
) {
    let mut window = Aggregate::new();
    let mut ticker = interval_at(Instant::now() + report_interval, report_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            _ = clear.notified() => {
                debug!("Clearing accumulated stats");
                window = Aggregate::new();
            }

            Some(record) = records.recv() => window.apply(record),

            _ = ticker.tick() => {
                let lost = dropped.swap(0, Ordering::Relaxed);
                if lost > 0 {
                    warn!("Record buffer full, dropped {} stats records", lost);
                }

                let report = window.flush();
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    sent = reports.send(report) => {
                        if sent.is_err() {
                            debug!("Report stream dropped, stopping aggregator");
                            break;
                        }
                    }
                }
            }
        }
    }

    debug!("Stats aggregator stopped");
}
