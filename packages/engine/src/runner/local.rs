// packages/engine/src/runner/local.rs
//! Local mode: hatch immediately and forward reports to the outputs until
//! the runner is closed.

use super::core::RunnerCore;
use super::Runner;
use crate::events::{QuitOrigin, RunnerEvent};
use crate::utils::{EngineError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Runs a fixed hatch without a controller
pub struct LocalRunner {
    core: Arc<RunnerCore>,
    hatch_count: usize,
    hatch_rate: i64,
    running: AtomicBool,
}

impl LocalRunner {
    pub fn new(core: Arc<RunnerCore>, hatch_count: usize, hatch_rate: i64) -> Self {
        Self {
            core,
            hatch_count,
            hatch_rate,
            running: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Runner for LocalRunner {
    async fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyRunning);
        }
        let mut reports = self
            .core
            .stats()
            .take_reports()
            .ok_or(EngineError::StreamUnavailable("stats reports"))?;
        let shutdown = self.core.shutdown_token();

        info!(
            "Local runner starting: {} workers, hatch rate {}",
            self.hatch_count, self.hatch_rate
        );

        self.core.stats().start();
        self.core.start_rate_limiter();
        self.core
            .start_hatching(self.hatch_count, self.hatch_rate, None)
            .await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                report = reports.recv() => match report {
                    Some(report) => {
                        let report = self.core.with_user_count(report);
                        self.core.outputs_on_event(&report).await;
                    }
                    None => {
                        debug!("Stats report stream ended");
                        shutdown.cancelled().await;
                        break;
                    }
                },
            }
        }

        self.core
            .events()
            .publish(RunnerEvent::Quit { origin: QuitOrigin::Local });
        self.core.stop().await;
        info!("Local runner finished");
        Ok(())
    }

    async fn close(&self) {
        self.core.close();
    }

    fn core(&self) -> &Arc<RunnerCore> {
        &self.core
    }
}
