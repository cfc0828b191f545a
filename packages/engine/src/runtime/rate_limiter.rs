// packages/engine/src/runtime/rate_limiter.rs
//! Rate limiter capability
//!
//! The engine does not ship a limiting algorithm; embedders plug one in.
//! A limiter is started when a hatch cycle begins, stopped with the cycle,
//! and polled by every worker before each task execution.

use async_trait::async_trait;

/// Throttle shared by all workers of a runner
///
/// Implementations must tolerate concurrent `acquire` calls from every
/// worker context.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Begin refilling permits
    fn start(&self);

    /// Stop refilling permits
    fn stop(&self);

    /// Ask for one permit.
    ///
    /// Returns `true` when the caller is blocked and must not run a task on
    /// this iteration.
    async fn acquire(&self) -> bool;
}
