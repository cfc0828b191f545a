// packages/engine/src/main.rs
//! LoadSwarm Worker
//!
//! Runs a local swarm of synthetic users until interrupted.

use anyhow::Result;
use loadswarm_engine::observability::{init_metrics, init_tracing};
use loadswarm_engine::output::{ConsoleOutput, PrometheusOutput};
use loadswarm_engine::runner::{LocalRunner, Runner, RunnerCore};
use loadswarm_engine::runtime::{HatchStyle, Task, TaskSet};
use loadswarm_engine::stats::RequestStats;
use loadswarm_engine::utils::EngineConfig;
use loadswarm_engine::BuildInfo;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::load()?;

    init_tracing(&config.observability)?;
    let metrics_enabled = init_metrics(&config.observability)?;

    let build = BuildInfo::current();
    info!(
        "Starting LoadSwarm worker v{} ({}, built with {})",
        build.version, build.git_hash, build.rustc_version
    );
    info!("Configuration loaded: {:?}", config);

    let stats = Arc::new(RequestStats::new(config.runner.report_interval()));
    let tasks = synthetic_tasks(Arc::clone(&stats))?;

    let core = RunnerCore::new(tasks, stats)
        .with_hatch_style(HatchStyle::from(config.runner.hatch_type.as_str()));
    if config.observability.console_output {
        core.add_output(Arc::new(ConsoleOutput::new()));
    }
    if metrics_enabled {
        core.add_output(Arc::new(PrometheusOutput::new()));
    }

    let runner = Arc::new(LocalRunner::new(
        Arc::new(core),
        config.runner.hatch_count,
        config.runner.hatch_rate,
    ));

    let handle = tokio::spawn({
        let runner = Arc::clone(&runner);
        async move { runner.run().await }
    });

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, cleaning up...");
    runner.close().await;

    match handle.await? {
        Ok(()) => {
            info!("Worker stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Worker error: {}", e);
            Err(e.into())
        }
    }
}

/// Simulated user behaviour that exercises the stats pipeline
fn synthetic_tasks(stats: Arc<RequestStats>) -> loadswarm_engine::Result<TaskSet> {
    let browse = Arc::clone(&stats);
    let checkout = stats;

    TaskSet::new(vec![
        Task::new("browse", 3, move || {
            let stats = Arc::clone(&browse);
            async move {
                let started = Instant::now();
                let (latency, size) = {
                    let mut rng = rand::thread_rng();
                    (rng.gen_range(5..50), rng.gen_range(512..4096))
                };
                tokio::time::sleep(Duration::from_millis(latency)).await;
                stats.record_success("GET", "/products", elapsed_ms(started), size);
            }
        }),
        Task::new("checkout", 1, move || {
            let stats = Arc::clone(&checkout);
            async move {
                let started = Instant::now();
                let (latency, failed) = {
                    let mut rng = rand::thread_rng();
                    (rng.gen_range(20..120), rng.gen_bool(0.1))
                };
                tokio::time::sleep(Duration::from_millis(latency)).await;
                if failed {
                    stats.record_failure("POST", "/checkout", elapsed_ms(started), "payment declined");
                } else {
                    stats.record_success("POST", "/checkout", elapsed_ms(started), 128);
                }
            }
        }),
    ])
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}
