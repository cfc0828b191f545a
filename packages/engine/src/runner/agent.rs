// packages/engine/src/runner/agent.rs
//! Agent mode: a controller-driven worker
//!
//! Three loops run concurrently until the runner is closed:
//!
//! ```text
//! listener   inbound commands + hatch completions → state machine (sole state writer)
//! relay      stats reports → controller `stats` message + outputs
//! heartbeat  every interval → controller `heartbeat {state}`
//! ```
//!
//! Transitions driven by the listener:
//!
//! ```text
//! ready/stopped     + hatch → hatching   begin hatch cycle
//! ready/stopped     + quit  → ready      publish quit
//! hatching/running  + hatch → hatching   stop, begin hatch cycle
//! hatching/running  + stop  → ready      stop, send client_stopped + client_ready
//! hatching/running  + quit  → ready      stop, publish quit
//! hatching          + ramp-up complete → running, send hatch_complete
//! ```

use super::core::RunnerCore;
use super::state::{RunnerState, SharedState};
use super::Runner;
use crate::events::{QuitOrigin, RunnerEvent, TOPIC_QUIT};
use crate::protocol::{Command, HatchRequest, MessageType, Payload, ProtocolMessage, Transport};
use crate::runtime::CycleId;
use crate::stats::StatsPayload;
use crate::utils::{generate_node_id, EngineError, Result, RunnerConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Notifications fed back into the listener from other contexts
#[derive(Debug, Clone, Copy)]
enum Control {
    HatchComplete(CycleId),
}

/// Worker driven by a remote controller
pub struct AgentRunner {
    core: Arc<RunnerCore>,
    transport: Arc<dyn Transport>,
    node_id: String,
    state: SharedState,
    heartbeat_interval: Duration,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: Mutex<Option<mpsc::UnboundedReceiver<Control>>>,
}

impl AgentRunner {
    pub fn new(core: Arc<RunnerCore>, transport: Arc<dyn Transport>) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Self {
            core,
            transport,
            node_id: generate_node_id(),
            state: SharedState::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            control_tx,
            control_rx: Mutex::new(Some(control_rx)),
        }
    }

    /// Agent with the heartbeat period from the `runner` config section
    pub fn from_config(
        core: Arc<RunnerCore>,
        transport: Arc<dyn Transport>,
        config: &RunnerConfig,
    ) -> Self {
        Self::new(core, transport).with_heartbeat_interval(config.heartbeat_interval())
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn state(&self) -> RunnerState {
        self.state.get()
    }

    /// Tell the controller this worker is leaving, then close
    pub async fn quit(&self) {
        self.core
            .events()
            .publish(RunnerEvent::Quit { origin: QuitOrigin::Local });
        self.close().await;
    }

    fn send(&self, msg_type: MessageType, data: Option<Payload>) {
        let msg = ProtocolMessage::new(msg_type, data, self.node_id.clone());
        if self.transport.outbound().send(msg).is_err() {
            debug!("Dropping {} message, transport is closed", msg_type);
        }
    }

    async fn listen(
        &self,
        inbound: &mut mpsc::UnboundedReceiver<ProtocolMessage>,
        control: &mut mpsc::UnboundedReceiver<Control>,
    ) {
        let shutdown = self.core.shutdown_token();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(event) = control.recv() => self.on_control(event),
                msg = inbound.recv() => match msg {
                    Some(msg) => self.on_message(msg).await,
                    None => {
                        warn!("Controller stream closed");
                        shutdown.cancelled().await;
                        break;
                    }
                },
            }
        }
        debug!("Listener stopped");
    }

    async fn on_message(&self, msg: ProtocolMessage) {
        let command = match Command::try_from(&msg) {
            Ok(command) => command,
            Err(e) => {
                warn!("Ignoring {} message from controller: {}", msg.msg_type, e);
                return;
            }
        };

        use RunnerState::*;
        match (self.state.get(), command) {
            (Ready | Stopped, Command::Hatch(request)) => {
                self.state.set(Hatching);
                self.begin_hatch(request).await;
            }
            (Ready | Stopped, Command::Quit) => {
                self.publish_controller_quit();
                self.state.set(Ready);
            }
            (Hatching | Running, Command::Hatch(request)) => {
                self.core.stop().await;
                self.state.set(Hatching);
                self.begin_hatch(request).await;
            }
            (Hatching | Running, Command::Stop) => {
                self.core.stop().await;
                self.state.set(Stopped);
                self.send(MessageType::ClientStopped, None);
                self.send(MessageType::ClientReady, None);
                self.state.set(Ready);
            }
            (Hatching | Running, Command::Quit) => {
                self.core.stop().await;
                self.publish_controller_quit();
                self.state.set(Ready);
            }
            (state, command) => {
                debug!("Ignoring {:?} in state {}", command, state);
            }
        }
    }

    async fn begin_hatch(&self, request: HatchRequest) {
        info!(
            "Controller requested {} workers at hatch rate {}",
            request.workers, request.hatch_rate
        );

        self.send(MessageType::Hatching, None);
        self.core.events().publish(RunnerEvent::Hatch {
            workers: request.workers,
            hatch_rate: request.hatch_rate,
        });
        self.core.start_rate_limiter();

        let control = self.control_tx.clone();
        self.core
            .start_hatching(
                request.workers,
                request.hatch_rate,
                Some(Box::new(move |cycle| {
                    let _ = control.send(Control::HatchComplete(cycle));
                })),
            )
            .await;
    }

    fn on_control(&self, event: Control) {
        match event {
            Control::HatchComplete(cycle) => {
                if self.core.current_cycle() != Some(cycle)
                    || self.state.get() != RunnerState::Hatching
                {
                    debug!("Ignoring stale completion of hatch cycle {}", cycle);
                    return;
                }

                let count = self.core.active_workers();
                let mut data = Payload::new();
                data.insert("count".to_string(), Value::from(count as u64));
                self.send(MessageType::HatchComplete, Some(data));
                self.state.set(RunnerState::Running);
                info!("Hatch cycle {} complete with {} workers", cycle, count);
            }
        }
    }

    fn publish_controller_quit(&self) {
        info!("Controller requested quit");
        self.core.events().publish(RunnerEvent::Quit {
            origin: QuitOrigin::Controller,
        });
    }

    async fn relay(&self, reports: &mut mpsc::Receiver<StatsPayload>) {
        let shutdown = self.core.shutdown_token();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                report = reports.recv() => match report {
                    Some(report) => self.relay_report(report).await,
                    None => {
                        debug!("Stats report stream ended");
                        shutdown.cancelled().await;
                        break;
                    }
                },
            }
        }
    }

    async fn relay_report(&self, report: StatsPayload) {
        let state = self.state.get();
        if matches!(state, RunnerState::Ready | RunnerState::Stopped) {
            trace!("Dropping stats report while {}", state);
            return;
        }

        let report = self.core.with_user_count(report);
        self.send(MessageType::Stats, Some(report.clone()));
        self.core.outputs_on_event(&report).await;
    }

    async fn heartbeat(&self) {
        let shutdown = self.core.shutdown_token();
        let period = self.heartbeat_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let mut data = Payload::new();
                    data.insert(
                        "state".to_string(),
                        Value::from(self.state.get().as_str()),
                    );
                    self.send(MessageType::Heartbeat, Some(data));
                }
            }
        }
    }
}

#[async_trait]
impl Runner for AgentRunner {
    async fn run(&self) -> Result<()> {
        let mut control = self
            .control_rx
            .lock()
            .take()
            .ok_or(EngineError::AlreadyRunning)?;
        self.state.set(RunnerState::Ready);

        if let Err(e) = self.transport.connect().await {
            error!("Failed to connect to controller: {}", e);
            return Err(e);
        }

        let mut inbound = self
            .transport
            .take_inbound()
            .ok_or(EngineError::StreamUnavailable("controller inbound"))?;
        let mut reports = self
            .core
            .stats()
            .take_reports()
            .ok_or(EngineError::StreamUnavailable("stats reports"))?;

        // a quit we raise ourselves is announced; one from the controller is not
        let outbound = self.transport.outbound();
        let node_id = self.node_id.clone();
        let quit_subscription = self.core.events().subscribe(TOPIC_QUIT, move |event| {
            if let RunnerEvent::Quit {
                origin: QuitOrigin::Local,
            } = event
            {
                let msg = ProtocolMessage::new(MessageType::Quit, None, node_id.clone());
                let _ = outbound.send(msg);
            }
        });

        self.core.stats().start();
        self.send(MessageType::ClientReady, None);
        info!("Worker {} connected and ready", self.node_id);

        tokio::join!(
            self.listen(&mut inbound, &mut control),
            self.relay(&mut reports),
            self.heartbeat(),
        );

        self.core.events().unsubscribe(TOPIC_QUIT, quit_subscription);
        self.core.stop().await;
        info!("Worker {} finished", self.node_id);
        Ok(())
    }

    async fn close(&self) {
        if self.core.close() {
            self.transport.close().await;
        }
    }

    fn core(&self) -> &Arc<RunnerCore> {
        &self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ControllerEnd, LoopbackTransport};
    use crate::events::TOPIC_HATCH;
    use crate::runner::test_support::{
        counting_tasks, eventually, CountingLimiter, ManualStats, RecordingOutput,
    };
    use crate::stats::USER_COUNT_KEY;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::task::JoinHandle;

    const QUIET: Duration = Duration::from_millis(150);

    struct Harness {
        runner: Arc<AgentRunner>,
        transport: Arc<LoopbackTransport>,
        controller: ControllerEnd,
        stats: Arc<ManualStats>,
        output: Arc<RecordingOutput>,
        handle: JoinHandle<Result<()>>,
    }

    async fn start(heartbeat: Duration) -> Harness {
        start_with(heartbeat, None).await
    }

    async fn start_with(heartbeat: Duration, limiter: Option<Arc<CountingLimiter>>) -> Harness {
        let stats = Arc::new(ManualStats::default());
        let output = Arc::new(RecordingOutput::default());
        let mut core =
            RunnerCore::new(counting_tasks(Arc::new(AtomicU64::new(0))), stats.clone());
        if let Some(limiter) = limiter {
            core = core.with_rate_limiter(limiter);
        }
        core.add_output(output.clone());

        let (transport, mut controller) = LoopbackTransport::pair();
        let transport = Arc::new(transport);
        let runner = Arc::new(
            AgentRunner::new(Arc::new(core), transport.clone())
                .with_node_id("node-1")
                .with_heartbeat_interval(heartbeat),
        );
        let handle = tokio::spawn({
            let runner = Arc::clone(&runner);
            async move { runner.run().await }
        });

        let ready = next_message(&mut controller).await;
        assert_eq!(ready.msg_type, MessageType::ClientReady);
        assert_eq!(ready.node_id, "node-1");

        Harness {
            runner,
            transport,
            controller,
            stats,
            output,
            handle,
        }
    }

    async fn start_quiet() -> Harness {
        start(Duration::from_secs(3600)).await
    }

    fn command(msg_type: MessageType, data: Value) -> ProtocolMessage {
        ProtocolMessage::new(msg_type, data.as_object().cloned(), "controller")
    }

    fn hatch(workers: u64, rate: u64) -> ProtocolMessage {
        command(
            MessageType::Hatch,
            json!({"num_clients": workers, "hatch_rate": rate}),
        )
    }

    async fn next_message(controller: &mut ControllerEnd) -> ProtocolMessage {
        loop {
            let msg = controller
                .recv_timeout(Duration::from_secs(5))
                .await
                .expect("no message from worker");
            if msg.msg_type != MessageType::Heartbeat {
                return msg;
            }
        }
    }

    async fn hatch_until_running(h: &mut Harness, workers: u64) {
        assert!(h.controller.send(hatch(workers, 0)));
        assert_eq!(next_message(&mut h.controller).await.msg_type, MessageType::Hatching);
        let complete = next_message(&mut h.controller).await;
        assert_eq!(complete.msg_type, MessageType::HatchComplete);
        assert_eq!(complete.data.unwrap()["count"], json!(workers));
        let runner = Arc::clone(&h.runner);
        assert!(eventually(|| runner.state() == RunnerState::Running).await);
    }

    async fn shutdown(h: Harness) {
        h.runner.close().await;
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_hatch_from_ready_reaches_running() {
        let mut h = start_quiet().await;
        assert_eq!(h.runner.state(), RunnerState::Ready);

        assert!(h.controller.send(hatch(5, 2)));
        assert_eq!(next_message(&mut h.controller).await.msg_type, MessageType::Hatching);

        let complete = next_message(&mut h.controller).await;
        assert_eq!(complete.msg_type, MessageType::HatchComplete);
        assert_eq!(complete.data.unwrap()["count"], json!(5));

        let runner = Arc::clone(&h.runner);
        assert!(eventually(|| runner.state() == RunnerState::Running).await);
        assert_eq!(h.runner.core().active_workers(), 5);
        assert_eq!(h.runner.core().hatch_rate(), 2);

        shutdown(h).await;
    }

    #[tokio::test]
    async fn test_stop_while_running_returns_to_ready() {
        let mut h = start_quiet().await;
        hatch_until_running(&mut h, 3).await;

        assert!(h.controller.send(command(MessageType::Stop, Value::Null)));
        assert_eq!(next_message(&mut h.controller).await.msg_type, MessageType::ClientStopped);
        assert_eq!(next_message(&mut h.controller).await.msg_type, MessageType::ClientReady);

        let runner = Arc::clone(&h.runner);
        assert!(eventually(|| runner.state() == RunnerState::Ready).await);
        assert!(h.runner.core().wait_for_workers(Duration::from_secs(2)).await);
        assert_eq!(h.output.calls(), ["start", "stop"]);

        shutdown(h).await;
    }

    #[tokio::test]
    async fn test_stop_while_hatching_skips_completion() {
        let mut h = start_quiet().await;

        // one launch per second, so ramp-up is still in progress at the stop
        assert!(h.controller.send(hatch(5, 1)));
        assert_eq!(next_message(&mut h.controller).await.msg_type, MessageType::Hatching);
        assert!(h.controller.send(command(MessageType::Stop, Value::Null)));

        assert_eq!(next_message(&mut h.controller).await.msg_type, MessageType::ClientStopped);
        assert_eq!(next_message(&mut h.controller).await.msg_type, MessageType::ClientReady);

        let runner = Arc::clone(&h.runner);
        assert!(eventually(|| runner.state() == RunnerState::Ready).await);
        assert!(h.runner.core().wait_for_workers(Duration::from_secs(2)).await);
        assert!(h.controller.recv_timeout(Duration::from_millis(1200)).await.is_none());
        assert!(h.runner.core().current_cycle().is_none());
        assert!(h.runner.core().active_workers() < 5);

        shutdown(h).await;
    }

    #[tokio::test]
    async fn test_stale_completion_is_ignored() {
        let mut h = start_quiet().await;
        hatch_until_running(&mut h, 2).await;

        assert!(h.controller.send(hatch(5, 1)));
        assert_eq!(next_message(&mut h.controller).await.msg_type, MessageType::Hatching);
        let runner = Arc::clone(&h.runner);
        assert!(eventually(|| runner.core().current_cycle() == Some(2)).await);

        // completion of the superseded first cycle
        h.runner.control_tx.send(Control::HatchComplete(1)).unwrap();
        assert!(h.controller.recv_timeout(QUIET).await.is_none());
        assert_eq!(h.runner.state(), RunnerState::Hatching);

        shutdown(h).await;
    }

    #[tokio::test]
    async fn test_hatch_publishes_event_and_starts_limiter() {
        let limiter = Arc::new(CountingLimiter::default());
        let mut h = start_with(Duration::from_secs(3600), Some(Arc::clone(&limiter))).await;

        let hatches = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&hatches);
        h.runner.core().events().subscribe(TOPIC_HATCH, move |event| {
            seen.lock().push(event.clone());
        });

        hatch_until_running(&mut h, 3).await;
        assert_eq!(
            hatches.lock().as_slice(),
            [RunnerEvent::Hatch {
                workers: 3,
                hatch_rate: 0
            }]
        );
        assert_eq!(limiter.starts.load(Ordering::SeqCst), 1);

        assert!(h.controller.send(command(MessageType::Stop, Value::Null)));
        assert_eq!(next_message(&mut h.controller).await.msg_type, MessageType::ClientStopped);
        assert_eq!(limiter.stops.load(Ordering::SeqCst), 1);

        shutdown(h).await;
    }

    #[tokio::test]
    async fn test_quit_while_ready_keeps_state() {
        let mut h = start_quiet().await;
        let quits = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&quits);
        h.runner.core().events().subscribe(TOPIC_QUIT, move |event| {
            seen.lock().push(event.clone());
        });

        assert!(h.controller.send(command(MessageType::Quit, Value::Null)));

        let published = Arc::clone(&quits);
        assert!(eventually(|| published.lock().len() == 1).await);
        assert_eq!(
            quits.lock().as_slice(),
            [RunnerEvent::Quit { origin: QuitOrigin::Controller }]
        );
        assert_eq!(h.runner.state(), RunnerState::Ready);
        assert!(h.controller.recv_timeout(QUIET).await.is_none());
        assert!(h.output.calls().is_empty());

        shutdown(h).await;
    }

    #[tokio::test]
    async fn test_hatch_while_running_restarts_cycle() {
        let mut h = start_quiet().await;
        hatch_until_running(&mut h, 2).await;
        hatch_until_running(&mut h, 4).await;

        assert_eq!(h.runner.core().current_cycle(), Some(2));
        assert_eq!(h.output.calls(), ["start", "stop", "start"]);

        shutdown(h).await;
    }

    #[tokio::test]
    async fn test_malformed_hatch_is_ignored() {
        let mut h = start_quiet().await;

        let bad = command(MessageType::Hatch, json!({"num_clients": "many", "hatch_rate": 1}));
        assert!(h.controller.send(bad));
        assert!(h.controller.send(command(MessageType::Hatch, Value::Null)));
        assert!(h.controller.recv_timeout(QUIET).await.is_none());
        assert_eq!(h.runner.state(), RunnerState::Ready);
        assert!(h.runner.core().current_cycle().is_none());

        // the listener is still serving commands
        hatch_until_running(&mut h, 1).await;

        shutdown(h).await;
    }

    #[tokio::test]
    async fn test_stop_while_ready_is_ignored() {
        let mut h = start_quiet().await;

        assert!(h.controller.send(command(MessageType::Stop, Value::Null)));
        assert!(h.controller.recv_timeout(QUIET).await.is_none());
        assert_eq!(h.runner.state(), RunnerState::Ready);
        assert!(h.output.calls().is_empty());

        shutdown(h).await;
    }

    #[tokio::test]
    async fn test_connect_failure_aborts_run() {
        let stats = Arc::new(ManualStats::default());
        let core = RunnerCore::new(counting_tasks(Arc::new(AtomicU64::new(0))), stats.clone());
        let (transport, mut controller) = LoopbackTransport::unreachable();
        let runner = AgentRunner::new(Arc::new(core), Arc::new(transport));

        let result = runner.run().await;
        assert!(matches!(result, Err(EngineError::ConnectionFailed(_))));
        assert!(controller.try_recv().is_none());
        assert_eq!(stats.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_controller_quit_is_not_echoed() {
        let mut h = start_quiet().await;
        let quits = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&quits);
        h.runner.core().events().subscribe(TOPIC_QUIT, move |event| {
            seen.lock().push(event.clone());
        });

        hatch_until_running(&mut h, 2).await;
        assert!(h.controller.send(command(MessageType::Quit, Value::Null)));

        let runner = Arc::clone(&h.runner);
        assert!(eventually(|| runner.state() == RunnerState::Ready).await);
        assert!(h.controller.recv_timeout(QUIET).await.is_none());
        assert_eq!(
            quits.lock().as_slice(),
            [RunnerEvent::Quit { origin: QuitOrigin::Controller }]
        );
        assert!(h.runner.core().current_cycle().is_none());

        shutdown(h).await;
    }

    #[tokio::test]
    async fn test_local_quit_notifies_controller_and_closes() {
        let mut h = start_quiet().await;

        h.runner.quit().await;
        let quit = next_message(&mut h.controller).await;
        assert_eq!(quit.msg_type, MessageType::Quit);
        assert_eq!(quit.node_id, "node-1");

        h.handle.await.unwrap().unwrap();
        assert!(h.transport.is_closed());
        assert!(h.runner.core().is_closed());
    }

    #[test]
    fn test_node_id_generated_per_runner() {
        let core = || {
            let stats = Arc::new(ManualStats::default());
            Arc::new(RunnerCore::new(counting_tasks(Arc::new(AtomicU64::new(0))), stats))
        };
        let (first, _) = LoopbackTransport::pair();
        let (second, _) = LoopbackTransport::pair();
        let a = AgentRunner::new(core(), Arc::new(first));
        let b = AgentRunner::new(core(), Arc::new(second));
        assert_ne!(a.node_id(), b.node_id());
        assert!(a.node_id().contains('_'));

        let (third, _) = LoopbackTransport::pair();
        let config = RunnerConfig {
            heartbeat_interval_ms: 250,
            ..RunnerConfig::default()
        };
        let c = AgentRunner::from_config(core(), Arc::new(third), &config);
        assert_eq!(c.heartbeat_interval, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_heartbeat_reports_state() {
        let mut h = start(Duration::from_millis(20)).await;

        let beat = h
            .controller
            .recv_timeout(Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(beat.msg_type, MessageType::Heartbeat);
        assert_eq!(beat.data.unwrap()["state"], json!("ready"));

        shutdown(h).await;
    }

    #[tokio::test]
    async fn test_stats_relay_follows_state() {
        let mut h = start_quiet().await;

        h.stats.reports.send(StatsPayload::new()).await.unwrap();
        assert!(h.controller.recv_timeout(QUIET).await.is_none());
        assert!(h.output.events.lock().is_empty());

        hatch_until_running(&mut h, 2).await;

        let mut report = StatsPayload::new();
        report.insert("stats".to_string(), json!([]));
        h.stats.reports.send(report).await.unwrap();

        let stats = next_message(&mut h.controller).await;
        assert_eq!(stats.msg_type, MessageType::Stats);
        let data = stats.data.unwrap();
        assert_eq!(data[USER_COUNT_KEY], json!(2));
        assert_eq!(data["stats"], json!([]));

        let output = Arc::clone(&h.output);
        assert!(eventually(|| output.events.lock().len() == 1).await);

        shutdown(h).await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let h = start_quiet().await;

        h.runner.close().await;
        h.runner.close().await;
        h.handle.await.unwrap().unwrap();

        assert!(h.transport.is_closed());
        assert_eq!(h.stats.closes.load(Ordering::SeqCst), 1);
        assert!(matches!(h.runner.run().await, Err(EngineError::AlreadyRunning)));
    }
}
