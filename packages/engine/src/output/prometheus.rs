// packages/engine/src/output/prometheus.rs
//! Mirror stats reports into `metrics` so the Prometheus exporter serves them

use crate::output::Output;
use crate::stats::{StatsPayload, StatsReport};
use async_trait::async_trait;
use metrics::{counter, gauge};

pub const USERS_GAUGE: &str = "loadswarm_users";
pub const REQUESTS_COUNTER: &str = "loadswarm_requests_total";
pub const FAILURES_COUNTER: &str = "loadswarm_failures_total";
pub const ERRORS_COUNTER: &str = "loadswarm_errors_total";
pub const AVG_RESPONSE_GAUGE: &str = "loadswarm_response_time_avg_ms";
pub const MIN_RESPONSE_GAUGE: &str = "loadswarm_response_time_min_ms";
pub const MAX_RESPONSE_GAUGE: &str = "loadswarm_response_time_max_ms";

/// Output sink backed by the global `metrics` recorder
#[derive(Debug, Default)]
pub struct PrometheusOutput;

impl PrometheusOutput {
    pub fn new() -> Self {
        Self
    }

    pub(crate) fn record(report: &StatsReport) {
        gauge!(USERS_GAUGE).set(report.user_count as f64);

        for entry in &report.entries {
            let labels = [
                ("method", entry.method.clone()),
                ("name", entry.name.clone()),
            ];
            counter!(REQUESTS_COUNTER, &labels).increment(entry.num_requests);
            counter!(FAILURES_COUNTER, &labels).increment(entry.num_failures);
            gauge!(AVG_RESPONSE_GAUGE, &labels).set(entry.avg_response_time());
            gauge!(MIN_RESPONSE_GAUGE, &labels).set(entry.min_response_time as f64);
            gauge!(MAX_RESPONSE_GAUGE, &labels).set(entry.max_response_time as f64);
        }

        for error in &report.errors {
            counter!(
                ERRORS_COUNTER,
                "method" => error.method.clone(),
                "name" => error.name.clone(),
                "error" => error.error.clone()
            )
            .increment(error.occurrences);
        }
    }
}

#[async_trait]
impl Output for PrometheusOutput {
    async fn on_start(&self) {
        gauge!(USERS_GAUGE).set(0.0);
    }

    async fn on_event(&self, data: &StatsPayload) {
        Self::record(&StatsReport::from_payload(data));
    }

    async fn on_stop(&self) {
        gauge!(USERS_GAUGE).set(0.0);
    }
}
