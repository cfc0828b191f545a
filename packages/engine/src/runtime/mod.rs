// packages/engine/src/runtime/mod.rs
//! Simulated-user runtime
//!
//! This module provides the pieces that execute load:
//!
//! - **Task**: weighted behaviour units and the immutable registry
//! - **Selector**: per-cycle weighted task selection
//! - **Spawner**: paced, cancellable ramp-up and the per-user task loop
//! - **Rate Limiter**: capability trait polled before every task execution
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  Hatch cycle (N users)               │
//! │                                                      │
//! │   Spawner ──spawn──► Worker 1 ─┐                     │
//! │      │     ──spawn──► Worker 2 ─┤  select task       │
//! │      │     ──spawn──► Worker N ─┘  (TaskSelector)    │
//! │      │                   │                           │
//! │      │              RateLimiter::acquire             │
//! │      │                   │                           │
//! │      └── CancellationToken (one per cycle) ◄── stop  │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod rate_limiter;
pub mod selector;
pub mod spawner;
pub mod task;

// Re-export commonly used types
pub use rate_limiter::RateLimiter;
pub use selector::TaskSelector;
pub use spawner::{CycleId, HatchCompleteFn, HatchStyle, SpawnOutcome, SpawnRequest, Spawner};
pub use task::{Task, TaskFn, TaskFuture, TaskSet};
