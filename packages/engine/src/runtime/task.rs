// packages/engine/src/runtime/task.rs
//! Task registry
//!
//! A [`Task`] is one weighted behaviour unit. The [`TaskSet`] is built once,
//! never mutated, and shared by every worker of every hatch cycle.

use crate::utils::errors::{EngineError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Future returned by a task action
pub type TaskFuture = BoxFuture<'static, ()>;

/// Zero-argument task body
pub type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// A weighted behaviour unit
#[derive(Clone)]
pub struct Task {
    /// Display name (used in logs)
    pub name: String,

    /// Relative selection weight
    pub weight: u32,

    action: TaskFn,
}

impl Task {
    pub fn new<F, Fut>(name: impl Into<String>, weight: u32, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            weight,
            action: Arc::new(move || action().boxed()),
        }
    }

    /// Start one execution of the task body
    pub fn run(&self) -> TaskFuture {
        (self.action)()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

/// Immutable, ordered task registry
#[derive(Debug, Clone)]
pub struct TaskSet {
    tasks: Arc<[Task]>,
}

impl TaskSet {
    /// Build a registry; registration order is preserved
    pub fn new(tasks: Vec<Task>) -> Result<Self> {
        if tasks.is_empty() {
            return Err(EngineError::NoTasks);
        }

        Ok(Self {
            tasks: tasks.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Always false; an empty registry is rejected at construction
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Task> {
        self.tasks.get(index)
    }

    pub fn as_slice(&self) -> &[Task] {
        &self.tasks
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn weight_sum(&self) -> u64 {
        self.tasks.iter().map(|t| u64::from(t.weight)).sum()
    }
}
