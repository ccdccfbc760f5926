//! Pool statistics and execution records

use tokio::time::Instant;

use crate::domain::TaskId;

/// Counters for the worker pool
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub rejected: u64,
    /// Tasks executing right now
    pub running: usize,
    pub peak_concurrent: usize,
    /// Tasks queued for a free worker
    pub backlog: usize,
}

impl PoolStats {
    /// Tasks accepted but not yet finished or cancelled
    pub fn outstanding(&self) -> u64 {
        self.submitted - self.completed - self.cancelled
    }
}

/// One task run on one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub task_id: TaskId,
    pub worker_id: usize,
    pub started: Instant,
    pub finished: Instant,
    /// Stopped by shutdown before the work finished
    pub cancelled: bool,
}

/// Largest number of executions running at the same instant
///
/// An execution that finishes at the instant another starts does not
/// overlap it.
pub fn max_overlap(executions: &[Execution]) -> usize {
    let mut edges: Vec<(Instant, i32)> = executions
        .iter()
        .flat_map(|e| [(e.started, 1), (e.finished, -1)])
        .collect();
    // Ends sort before starts at equal instants
    edges.sort();

    let mut current = 0i32;
    let mut peak = 0i32;
    for (_, delta) in edges {
        current += delta;
        peak = peak.max(current);
    }
    peak as usize
}
