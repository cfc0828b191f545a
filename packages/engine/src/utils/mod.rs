// packages/engine/src/utils/mod.rs
//! Shared utilities: errors, configuration, node identity

pub mod config;
pub mod errors;
pub mod node_id;

pub use config::{EngineConfig, LogFormat, ObservabilityConfig, RunnerConfig};
pub use errors::{EngineError, Result};
pub use node_id::generate_node_id;
