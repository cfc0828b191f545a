// packages/engine/src/output/mod.rs
//! Output sinks
//!
//! Every registered sink is told when a hatch cycle starts, receives every
//! relayed stats report, and is told when the cycle stops. The runner fans
//! each notification out to all sinks concurrently and waits for all of them.

pub mod console;
pub mod prometheus;

pub use console::ConsoleOutput;
pub use prometheus::PrometheusOutput;

use crate::stats::StatsPayload;
use async_trait::async_trait;

#[async_trait]
pub trait Output: Send + Sync {
    async fn on_start(&self);

    async fn on_event(&self, data: &StatsPayload);

    async fn on_stop(&self);
}
