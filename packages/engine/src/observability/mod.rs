// packages/engine/src/observability/mod.rs
//! Logging and metrics initialisation
//!
//! `RUST_LOG` takes precedence over the configured log level.

use crate::utils::{EngineError, LogFormat, ObservabilityConfig, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, Subscriber};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = filter(&config.log_level)?;

    match config.log_format {
        LogFormat::Text => install(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true)),
        ),
        LogFormat::Json => install(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_ansi(false).with_target(true)),
        ),
    }
}

fn filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).map_err(|e| {
            EngineError::Observability(format!("invalid log level '{}': {}", level, e))
        }),
    }
}

fn install<S>(subscriber: S) -> Result<()>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber
        .try_init()
        .map_err(|e| EngineError::Observability(e.to_string()))
}

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Returns false when no `metrics_addr` is configured.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<bool> {
    let Some(addr) = config.metrics_addr else {
        return Ok(false);
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| EngineError::Observability(format!("prometheus exporter: {}", e)))?;

    info!("Prometheus metrics listening on {}", addr);
    Ok(true)
}
