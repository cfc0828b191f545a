// packages/engine/src/events/mod.rs
//! Runner lifecycle notifications
//!
//! An [`EventDispatcher`] is owned by each runner and handed to whoever needs
//! to observe it (embedding code, the agent's quit relay). Subscriptions are
//! keyed by topic string:
//!
//! ```text
//! runner:stop   → a hatch cycle was stopped
//! runner:quit   → the worker is quitting (controller- or locally-initiated)
//! runner:hatch  → the controller asked for a new hatch cycle
//! ```

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

pub const TOPIC_STOP: &str = "runner:stop";
pub const TOPIC_QUIT: &str = "runner:quit";
pub const TOPIC_HATCH: &str = "runner:hatch";

/// Who asked the worker to quit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitOrigin {
    /// Received from the controller; must not be echoed back
    Controller,
    /// Raised by this process (local mode shutdown, embedder request)
    Local,
}

/// Notification payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerEvent {
    Stop,
    Quit { origin: QuitOrigin },
    Hatch { workers: usize, hatch_rate: i64 },
}

impl RunnerEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Stop => TOPIC_STOP,
            Self::Quit { .. } => TOPIC_QUIT,
            Self::Hatch { .. } => TOPIC_HATCH,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&RunnerEvent) + Send + Sync>;

/// Handle returned by [`EventDispatcher::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Topic-based publish/subscribe hub
#[derive(Default)]
pub struct EventDispatcher {
    subscribers: DashMap<String, Vec<(SubscriptionId, EventHandler)>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every event published on `topic`
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&RunnerEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .entry(topic.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscription; returns whether it existed
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        let Some(mut handlers) = self.subscribers.get_mut(topic) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(sub, _)| *sub != id);
        before != handlers.len()
    }

    /// Deliver `event` synchronously to the subscribers of its topic
    pub fn publish(&self, event: RunnerEvent) {
        let topic = event.topic();

        // Handlers run outside the shard lock so they may (un)subscribe.
        let handlers: Vec<EventHandler> = match self.subscribers.get(topic) {
            Some(entry) => entry.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return,
        };

        trace!("Publishing {:?} to {} subscriber(s)", event, handlers.len());
        for handler in handlers {
            handler(&event);
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers.get(topic).map(|h| h.len()).unwrap_or(0)
    }
}
