// packages/engine/src/utils/errors.rs
//! Engine error types

use thiserror::Error;

/// Result alias used across the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced by the worker engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The transport could not reach the controller
    #[error("Failed to connect to controller: {0}")]
    ConnectionFailed(String),

    /// A protocol payload was missing a field or carried the wrong type
    #[error("Invalid payload field '{field}': {reason}")]
    InvalidPayload { field: &'static str, reason: String },

    /// A message type that is not a controller command
    #[error("Unexpected message type: {0}")]
    UnexpectedMessage(String),

    /// A runner was built without any task to execute
    #[error("Task registry is empty")]
    NoTasks,

    /// A collaborator stream was already handed out
    #[error("{0} stream already taken")]
    StreamUnavailable(&'static str),

    /// `run` was invoked on a runner that already ran
    #[error("Runner is already running")]
    AlreadyRunning,

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Tracing or metrics setup failed
    #[error("Observability initialisation failed: {0}")]
    Observability(String),
}

impl EngineError {
    /// Shorthand for payload validation failures
    pub fn invalid_payload(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            field,
            reason: reason.into(),
        }
    }

    /// Whether the listener can log this error and keep going
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidPayload { .. } | Self::UnexpectedMessage(_)
        )
    }
}
