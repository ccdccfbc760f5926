//! WorkerPool implementation

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::delay::random_delay;
use crate::domain::TaskId;
use crate::error::{CoordError, CoordResult};
use crate::history::History;

use super::stats::{Execution, PoolStats};

const COMPONENT: &str = "pool";

struct PoolTask {
    id: TaskId,
    work: BoxFuture<'static, ()>,
}

#[derive(Default)]
struct PoolState {
    stats: PoolStats,
    executions: History<Execution>,
}

/// State shared by the pool handle and its workers
struct PoolShared {
    state: Mutex<PoolState>,
    /// Outstanding (accepted, not yet finished) task count
    outstanding: watch::Sender<u64>,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &PoolState) {
        self.outstanding.send_replace(state.stats.outstanding());
    }

    fn started(&self) -> Instant {
        let mut state = self.lock();
        state.stats.backlog = state.stats.backlog.saturating_sub(1);
        state.stats.running += 1;
        state.stats.peak_concurrent = state.stats.peak_concurrent.max(state.stats.running);
        Instant::now()
    }

    fn finished(&self, task_id: TaskId, worker_id: usize, started: Instant, cancelled: bool) {
        let mut state = self.lock();
        state.stats.running = state.stats.running.saturating_sub(1);
        if cancelled {
            state.stats.cancelled += 1;
        } else {
            state.stats.completed += 1;
        }
        state.executions.push(Execution {
            task_id,
            worker_id,
            started,
            finished: Instant::now(),
            cancelled,
        });
        self.publish(&state);
    }

    /// Account for tasks that never reached a worker
    fn dropped_queued(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut state = self.lock();
        state.stats.backlog = state.stats.backlog.saturating_sub(count);
        state.stats.cancelled += count as u64;
        self.publish(&state);
    }
}

/// Fixed set of workers draining a shared task queue
pub struct WorkerPool {
    workers: usize,
    max_backlog: Option<usize>,
    max_task_delay: Duration,
    sender: mpsc::UnboundedSender<PoolTask>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<PoolTask>>>,
    shared: Arc<PoolShared>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl WorkerPool {
    /// Start `workers` workers; must be called inside a tokio runtime
    pub fn new(workers: usize, max_backlog: Option<usize>, max_task_delay: Duration) -> Self {
        debug!(workers, ?max_backlog, ?max_task_delay, "WorkerPool::new: called");
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let (outstanding, _) = watch::channel(0);

        let pool = Self {
            workers,
            max_backlog,
            max_task_delay,
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState::default()),
                outstanding,
            }),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        };

        for worker_id in 1..=workers {
            let receiver = Arc::clone(&pool.receiver);
            let shared = Arc::clone(&pool.shared);
            let cancel = pool.cancel.clone();
            pool.tracker.spawn(run_worker(worker_id, receiver, shared, cancel));
        }
        info!(workers, "Worker pool started");
        pool
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.workers, config.max_backlog, config.max_task_delay())
    }

    /// Keep only the most recent `limit` execution records
    pub fn with_history_limit(self, limit: usize) -> Self {
        self.shared.lock().executions = History::new(limit);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queue a task whose work is a random delay; returns without waiting
    pub fn submit(&self, id: impl Into<TaskId>) -> CoordResult<()> {
        let delay = random_delay(self.max_task_delay);
        self.submit_with(id, tokio::time::sleep(delay))
    }

    /// Queue arbitrary work under `id`; returns without waiting
    pub fn submit_with<F>(&self, id: impl Into<TaskId>, work: F) -> CoordResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = id.into();
        debug!(%id, "WorkerPool::submit: called");

        if self.cancel.is_cancelled() {
            return Err(CoordError::Closed(COMPONENT));
        }

        {
            let mut state = self.shared.lock();
            if let Some(max) = self.max_backlog
                && state.stats.backlog >= max
            {
                state.stats.rejected += 1;
                warn!(%id, backlog = state.stats.backlog, "Task rejected, backlog full");
                return Err(CoordError::BacklogFull(state.stats.backlog));
            }
            state.stats.submitted += 1;
            state.stats.backlog += 1;
            self.shared.publish(&state);
        }

        let task = PoolTask { id, work: work.boxed() };
        if self.sender.send(task).is_err() {
            self.shared.dropped_queued(1);
            return Err(CoordError::Closed(COMPONENT));
        }
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.lock().stats.clone()
    }

    /// Recently finished executions in completion order
    pub fn executions(&self) -> Vec<Execution> {
        self.shared.lock().executions.to_vec()
    }

    /// Wait until every accepted task has finished
    pub async fn wait_idle(&self) {
        debug!("WorkerPool::wait_idle: called");
        let mut rx = self.shared.outstanding.subscribe();
        // The sender lives in `shared`, which outlives this borrow
        let _ = rx.wait_for(|outstanding| *outstanding == 0).await;
    }

    /// Stop the workers, cancelling running tasks and dropping the backlog
    pub async fn shutdown(&self) {
        debug!("WorkerPool::shutdown: called");
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        let mut dropped = 0;
        {
            let mut receiver = self.receiver.lock().await;
            receiver.close();
            while let Ok(task) = receiver.try_recv() {
                debug!(id = %task.id, "WorkerPool::shutdown: dropping queued task");
                dropped += 1;
            }
        }
        self.shared.dropped_queued(dropped);
        info!(dropped, "Worker pool stopped");
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<PoolTask>>>,
    shared: Arc<PoolShared>,
    cancel: CancellationToken,
) {
    debug!(worker_id, "run_worker: started");
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            task = async { receiver.lock().await.recv().await } => task,
        };
        let Some(task) = next else {
            break;
        };

        let started = shared.started();
        debug!(id = %task.id, worker_id, "Task started");

        let cancelled = tokio::select! {
            _ = task.work => false,
            _ = cancel.cancelled() => true,
        };

        if cancelled {
            warn!(id = %task.id, worker_id, "Task cancelled by shutdown");
        } else {
            info!(id = %task.id, worker_id, "Task {} completed by worker-{}", task.id, worker_id);
        }
        shared.finished(task.id, worker_id, started, cancelled);
    }
    debug!(worker_id, "run_worker: stopped");
}
