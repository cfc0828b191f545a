// packages/engine/src/runner/state.rs
//! Runner state

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle state reported to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunnerState {
    Ready = 0,
    Hatching = 1,
    Running = 2,
    Stopped = 3,
    /// Reserved; no transition enters it
    Quitting = 4,
}

impl RunnerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Hatching => "hatching",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Quitting => "quitting",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Hatching,
            2 => Self::Running,
            3 => Self::Stopped,
            4 => Self::Quitting,
            _ => Self::Ready,
        }
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State shared between the listener (sole writer) and the relay and
/// heartbeat loops (readers; a stale read is acceptable)
#[derive(Debug, Clone)]
pub struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub fn new(state: RunnerState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub fn get(&self) -> RunnerState {
        RunnerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: RunnerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(RunnerState::Ready)
    }
}
