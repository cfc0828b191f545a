// packages/engine/src/protocol/mod.rs
//! Controller protocol
//!
//! - **Message**: the logical message shape, its type tags, and the typed
//!   decoding of inbound controller commands
//! - **Transport**: connect/send/receive capability; wire encoding belongs to
//!   the transport implementation
//!
//! ```text
//! controller ──hatch/stop/quit──► worker
//! worker ──client_ready/hatching/hatch_complete/stats/heartbeat/client_stopped/quit──► controller
//! ```

pub mod message;
pub mod transport;

pub use message::{Command, HatchRequest, MessageType, Payload, ProtocolMessage};
pub use transport::{ControllerEnd, LoopbackTransport, Transport};
