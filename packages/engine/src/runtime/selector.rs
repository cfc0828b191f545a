// packages/engine/src/runtime/selector.rs
//! Weighted task selection
//!
//! Built once per hatch cycle from the registry. Each draw picks task `i`
//! with probability `weight_i / weight_sum` using prefix sums:
//!
//! ```text
//! weights     [3, 0, 7]
//! cumulative  [3, 3, 10]
//! draw ∈ [0, 10)  →  first index whose cumulative value exceeds the draw
//! ```
//!
//! Zero-weight tasks are never picked unless every weight is zero, in which
//! case selection is uniform over the whole registry.

use crate::runtime::task::{Task, TaskSet};
use rand::Rng;

/// Per-cycle weighted selector
#[derive(Debug, Clone)]
pub struct TaskSelector {
    tasks: TaskSet,
    cumulative: Vec<u64>,
    weight_sum: u64,
}

impl TaskSelector {
    pub fn new(tasks: &TaskSet) -> Self {
        let cumulative: Vec<u64> = tasks
            .iter()
            .scan(0u64, |acc, task| {
                *acc += u64::from(task.weight);
                Some(*acc)
            })
            .collect();
        let weight_sum = cumulative.last().copied().unwrap_or(0);

        Self {
            tasks: tasks.clone(),
            cumulative,
            weight_sum,
        }
    }

    pub fn weight_sum(&self) -> u64 {
        self.weight_sum
    }

    /// Index of the next task to run
    pub fn select_index<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        if self.weight_sum == 0 {
            return rng.gen_range(0..self.tasks.len());
        }

        let draw = rng.gen_range(0..self.weight_sum);
        self.cumulative.partition_point(|&bound| bound <= draw)
    }

    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> &Task {
        let index = self.select_index(rng);
        &self.tasks.as_slice()[index]
    }
}
