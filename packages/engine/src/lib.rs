// packages/engine/src/lib.rs
//! LoadSwarm Worker Engine Library
//!
//! The worker side of a distributed load generator: it runs weighted tasks
//! as simulated users, either on its own or under a remote controller.
//!
//! # Architecture
//!
//! - **runtime**: task registry, weighted selection, worker spawner
//! - **runner**: shared core plus local and agent run modes
//! - **protocol**: controller messages and transport abstraction
//! - **stats**: request statistics and periodic reports
//! - **output**: report sinks (console, Prometheus)
//! - **events**: runner lifecycle notifications
//! - **observability**: logging and metrics initialisation
//! - **utils**: configuration, errors, node identity

pub mod events;
pub mod observability;
pub mod output;
pub mod protocol;
pub mod runner;
pub mod runtime;
pub mod stats;
pub mod utils;

pub use events::{EventDispatcher, QuitOrigin, RunnerEvent};
pub use runner::{AgentRunner, LocalRunner, Runner, RunnerCore, RunnerState};
pub use runtime::{HatchStyle, RateLimiter, Task, TaskSet};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Engine build information
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}
