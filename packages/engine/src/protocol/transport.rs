// packages/engine/src/protocol/transport.rs
//! Transport capability and an in-process implementation
//!
//! A transport connects to the controller and exposes two streams: an
//! outbound sender the runner writes [`ProtocolMessage`]s to, and an inbound
//! receiver handed to the listener exactly once. Delivery is best-effort;
//! messages in flight when the connection drops are lost.

use crate::protocol::message::ProtocolMessage;
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the connection; fails with [`EngineError::ConnectionFailed`]
    async fn connect(&self) -> Result<()>;

    /// Sender for worker → controller messages
    fn outbound(&self) -> mpsc::UnboundedSender<ProtocolMessage>;

    /// Receiver for controller → worker messages; only the first call returns it
    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<ProtocolMessage>>;

    async fn close(&self);
}

/// Transport whose "controller" lives in the same process.
///
/// Used to drive a worker from embedding code or tests without a network.
pub struct LoopbackTransport {
    outbound_tx: mpsc::UnboundedSender<ProtocolMessage>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<ProtocolMessage>>>,
    reachable: bool,
    closed: AtomicBool,
}

/// The controller side of a [`LoopbackTransport`]
pub struct ControllerEnd {
    inbound_tx: mpsc::UnboundedSender<ProtocolMessage>,
    outbound_rx: mpsc::UnboundedReceiver<ProtocolMessage>,
}

impl LoopbackTransport {
    pub fn pair() -> (Self, ControllerEnd) {
        Self::build(true)
    }

    /// A transport whose `connect` always fails
    pub fn unreachable() -> (Self, ControllerEnd) {
        Self::build(false)
    }

    fn build(reachable: bool) -> (Self, ControllerEnd) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let transport = Self {
            outbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            reachable,
            closed: AtomicBool::new(false),
        };
        let controller = ControllerEnd {
            inbound_tx,
            outbound_rx,
        };
        (transport, controller)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self) -> Result<()> {
        if !self.reachable {
            return Err(EngineError::ConnectionFailed(
                "loopback controller is unreachable".to_string(),
            ));
        }
        debug!("Loopback transport connected");
        Ok(())
    }

    fn outbound(&self) -> mpsc::UnboundedSender<ProtocolMessage> {
        self.outbound_tx.clone()
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<ProtocolMessage>> {
        self.inbound_rx.lock().take()
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Loopback transport closed");
        }
    }
}

impl ControllerEnd {
    /// Deliver a message to the worker; false once the worker side is gone
    pub fn send(&self, msg: ProtocolMessage) -> bool {
        self.inbound_tx.send(msg).is_ok()
    }

    pub async fn recv(&mut self) -> Option<ProtocolMessage> {
        self.outbound_rx.recv().await
    }

    /// Next message within `timeout`
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<ProtocolMessage> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn try_recv(&mut self) -> Option<ProtocolMessage> {
        self.outbound_rx.try_recv().ok()
    }
}
