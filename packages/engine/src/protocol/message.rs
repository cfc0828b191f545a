// packages/engine/src/protocol/message.rs
//! Protocol messages and command decoding

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt;

/// Message payload
pub type Payload = Map<String, Value>;

/// Message type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // controller → worker
    Hatch,
    Stop,
    Quit,

    // worker → controller
    ClientReady,
    Hatching,
    HatchComplete,
    Stats,
    Heartbeat,
    ClientStopped,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hatch => "hatch",
            Self::Stop => "stop",
            Self::Quit => "quit",
            Self::ClientReady => "client_ready",
            Self::Hatching => "hatching",
            Self::HatchComplete => "hatch_complete",
            Self::Stats => "stats",
            Self::Heartbeat => "heartbeat",
            Self::ClientStopped => "client_stopped",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    #[serde(rename = "type")]
    pub msg_type: MessageType,

    pub data: Option<Payload>,

    pub node_id: String,
}

impl ProtocolMessage {
    pub fn new(msg_type: MessageType, data: Option<Payload>, node_id: impl Into<String>) -> Self {
        Self {
            msg_type,
            data,
            node_id: node_id.into(),
        }
    }
}

/// Validated `hatch` parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HatchRequest {
    pub workers: usize,
    pub hatch_rate: i64,
}

impl HatchRequest {
    /// Decode `num_clients` and `hatch_rate` from a hatch payload.
    ///
    /// Integers may arrive signed or unsigned; both normalise to `i64`.
    /// `hatch_rate` additionally accepts a float, truncated toward zero.
    pub fn from_payload(data: Option<&Payload>) -> Result<Self> {
        let data = data.ok_or_else(|| EngineError::invalid_payload("data", "hatch payload is empty"))?;

        let num_clients = integer(field(data, "num_clients")?, "num_clients")?;
        let workers = usize::try_from(num_clients).map_err(|_| {
            EngineError::invalid_payload("num_clients", format!("must be >= 0, got {}", num_clients))
        })?;

        let hatch_rate = match field(data, "hatch_rate")? {
            Value::Number(n) if n.is_f64() => float_rate(n)?,
            other => integer(other, "hatch_rate")?,
        };

        Ok(Self {
            workers,
            hatch_rate,
        })
    }
}

fn field<'a>(data: &'a Payload, name: &'static str) -> Result<&'a Value> {
    data.get(name)
        .ok_or_else(|| EngineError::invalid_payload(name, "missing"))
}

fn integer(value: &Value, name: &'static str) -> Result<i64> {
    let Value::Number(n) = value else {
        return Err(EngineError::invalid_payload(
            name,
            format!("expected an integer, got {}", value),
        ));
    };

    if let Some(signed) = n.as_i64() {
        return Ok(signed);
    }
    match n.as_u64() {
        Some(unsigned) => i64::try_from(unsigned)
            .map_err(|_| EngineError::invalid_payload(name, format!("{} is out of range", unsigned))),
        None => Err(EngineError::invalid_payload(
            name,
            format!("expected an integer, got {}", n),
        )),
    }
}

fn float_rate(n: &Number) -> Result<i64> {
    match n.as_f64() {
        Some(rate) if rate.is_finite() && rate.abs() < i64::MAX as f64 => Ok(rate.trunc() as i64),
        _ => Err(EngineError::invalid_payload("hatch_rate", format!("{} is out of range", n))),
    }
}

/// Controller command, decoded once at the listener boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Hatch(HatchRequest),
    Stop,
    Quit,
}

impl TryFrom<&ProtocolMessage> for Command {
    type Error = EngineError;

    fn try_from(msg: &ProtocolMessage) -> Result<Self> {
        match msg.msg_type {
            MessageType::Hatch => Ok(Self::Hatch(HatchRequest::from_payload(msg.data.as_ref())?)),
            MessageType::Stop => Ok(Self::Stop),
            MessageType::Quit => Ok(Self::Quit),
            other => Err(EngineError::UnexpectedMessage(other.to_string())),
        }
    }
}
