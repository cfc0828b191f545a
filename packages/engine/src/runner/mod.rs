// packages/engine/src/runner/mod.rs
//! Runners: the shared core plus the two run modes built on it

pub mod agent;
pub mod core;
pub mod local;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use agent::{AgentRunner, DEFAULT_HEARTBEAT_INTERVAL};
pub use self::core::RunnerCore;
pub use local::LocalRunner;
pub use state::{RunnerState, SharedState};

use crate::utils::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A run mode over a [`RunnerCore`]
#[async_trait]
pub trait Runner: Send + Sync {
    /// Drive the runner until it is closed
    async fn run(&self) -> Result<()>;

    /// Stop the current hatch cycle, if any
    async fn stop(&self) {
        self.core().stop().await;
    }

    /// Close the runner; later calls are no-ops
    async fn close(&self);

    fn core(&self) -> &Arc<RunnerCore>;
}
