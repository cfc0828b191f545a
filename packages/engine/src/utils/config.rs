// packages/engine/src/utils/config.rs
//! Engine configuration
//!
//! Values are layered in this order (later wins):
//!
//! 1. Built-in defaults
//! 2. Optional config file (`loadswarm.toml` / `.yaml` / `.json`, or an explicit path)
//! 3. Environment variables prefixed `LOADSWARM`, nested with `__`
//!    (e.g. `LOADSWARM_RUNNER__HATCH_RATE=10`)

use crate::utils::errors::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub runner: RunnerConfig,
    pub observability: ObservabilityConfig,
}

/// Hatching and reporting settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Hatch style; only `"smooth"` paces launches
    pub hatch_type: String,

    /// Number of simulated users in local mode
    pub hatch_count: usize,

    /// Users launched per second (0 = all at once)
    pub hatch_rate: i64,

    /// Heartbeat period in agent mode
    pub heartbeat_interval_ms: u64,

    /// Stats flush period
    pub report_interval_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            hatch_type: "smooth".to_string(),
            hatch_count: 1,
            hatch_rate: 1,
            heartbeat_interval_ms: 1_000,
            report_interval_ms: 3_000,
        }
    }
}

impl RunnerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging and metrics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_level: String,

    pub log_format: LogFormat,

    /// Prometheus scrape endpoint; disabled when unset
    pub metrics_addr: Option<SocketAddr>,

    /// Print stats tables to stdout
    pub console_output: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_addr: None,
            console_output: true,
        }
    }
}

impl EngineConfig {
    /// Load from `loadswarm.*` in the working directory (if present) and the environment
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("loadswarm").required(false))
            .add_source(Self::environment())
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load from an explicit file, still honouring environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Self::environment())
            .build()?;

        Ok(config.try_deserialize()?)
    }

    fn environment() -> Environment {
        Environment::with_prefix("LOADSWARM")
            .separator("__")
            .try_parsing(true)
    }
}
