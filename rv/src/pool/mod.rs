//! Fixed-size worker pool
//!
//! A set of long-lived workers pulls tasks from one shared queue, so
//! submitting a task never creates a new execution unit. When every worker
//! is busy, tasks wait in the backlog (optionally capped).

mod executor;
mod stats;

pub use executor::WorkerPool;
pub use stats::{Execution, PoolStats, max_overlap};
