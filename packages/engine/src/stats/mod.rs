// packages/engine/src/stats/mod.rs
//! Statistics collaborator
//!
//! The runner only depends on the [`StatsCollector`] contract:
//!
//! - `start` / `close`: lifecycle of the collector's background work
//! - `clear`: reset accumulated counters (sent at the start of every hatch cycle)
//! - `take_reports`: the outbound stream, one report map per flush
//!
//! [`RequestStats`] is the bundled implementation fed by task bodies.

pub mod request_stats;

pub use request_stats::{ErrorEntry, RequestStats, StatsEntry};

use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// One flushed report (`stats`, `stats_total`, `errors`, ...)
pub type StatsPayload = Map<String, Value>;

/// Key the runner adds to every report before relaying it
pub const USER_COUNT_KEY: &str = "user_count";

/// Capability set required from a statistics backend
pub trait StatsCollector: Send + Sync {
    fn start(&self);

    fn close(&self);

    /// Reset accumulated counters
    fn clear(&self);

    /// Hand out the report stream; only the first call returns it
    fn take_reports(&self) -> Option<mpsc::Receiver<StatsPayload>>;
}

/// Typed view of a report, for output sinks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsReport {
    pub user_count: u64,
    pub entries: Vec<StatsEntry>,
    pub total: Option<StatsEntry>,
    pub errors: Vec<ErrorEntry>,
}

impl StatsReport {
    /// Decode whatever parts of `payload` are present and well-formed
    pub fn from_payload(payload: &StatsPayload) -> Self {
        let user_count = payload
            .get(USER_COUNT_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let entries = payload
            .get("stats")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let total = payload
            .get("stats_total")
            .and_then(|v| serde_json::from_value(v.clone()).ok());

        let errors = payload
            .get("errors")
            .and_then(Value::as_object)
            .map(|errors| {
                errors
                    .values()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            user_count,
            entries,
            total,
            errors,
        }
    }
}
