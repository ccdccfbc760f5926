//! PatternService - one instance of each component behind the external operations
//!
//! Fire-and-forget operations spawn their unit on the service tracker and
//! acknowledge at once; failures of those units are logged with the
//! component and identity they belong to. Queued work takes its place in
//! line before the acknowledgement, so acknowledged order is processing
//! order.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::active::ActiveObjectExecutor;
use crate::aggregator::FutureAggregator;
use crate::barrier::Barrier;
use crate::channel::BoundedChannel;
use crate::config::Config;
use crate::delay::{random_delay, sleep_or_cancel};
use crate::domain::{Job, TaskId};
use crate::error::{CoordError, CoordResult};
use crate::monitor::MonitorQueue;
use crate::pool::WorkerPool;
use crate::rwlock::SharedRecord;

/// Immediate acknowledgement of an accepted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack(String);

impl Ack {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Ack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Log a failure at the boundary with enough context to diagnose it
fn report(component: &str, identity: &str, err: &CoordError) {
    if err.is_recoverable() {
        warn!(component, identity, error = %err, "Operation failed");
    } else {
        error!(component, identity, error = %err, "Operation failed with invariant violation");
    }
}

/// Owns the coordination components and exposes the external operations
pub struct PatternService {
    monitor: MonitorQueue,
    record: Arc<SharedRecord>,
    barrier: Arc<Barrier>,
    barrier_timeout: Option<Duration>,
    max_arrival_delay: Duration,
    channel: Arc<BoundedChannel>,
    pool: WorkerPool,
    futures: FutureAggregator,
    active: ActiveObjectExecutor,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl PatternService {
    /// Build every component from config; must be called inside a tokio runtime
    pub fn new(config: &Config) -> Self {
        debug!("PatternService::new: called");
        let barrier = Barrier::from_config(
            &config.barrier,
            Box::new(|generation: u64| {
                info!(generation, "All tasks completed. Proceeding to the next step...");
            }),
        );

        let limit = config.history_limit;
        Self {
            monitor: MonitorQueue::from_config(&config.monitor).with_history_limit(limit),
            record: Arc::new(SharedRecord::from_config(&config.rwlock).with_history_limit(limit)),
            barrier: Arc::new(barrier),
            barrier_timeout: config.barrier.timeout(),
            max_arrival_delay: config.barrier.max_arrival_delay(),
            channel: Arc::new(BoundedChannel::from_config(&config.channel).with_history_limit(limit)),
            pool: WorkerPool::from_config(&config.pool).with_history_limit(limit),
            futures: FutureAggregator::from_config(&config.futures),
            active: ActiveObjectExecutor::from_config(&config.active),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Queue a print job; acknowledges once queued, before it is printed
    pub fn submit_print_job(&self, job: impl Into<Job>) -> CoordResult<Ack> {
        let job = job.into();
        debug!(%job, "PatternService::submit_print_job: called");
        self.ensure_open("monitor")?;

        let queued = self
            .monitor
            .enqueue(job.clone())
            .inspect_err(|e| report("monitor", job.as_str(), e))?;
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            let spawned = queued.job().clone();
            if let Err(e) = queued.run_with_cancel(&cancel).await {
                report("monitor", spawned.as_str(), &e);
            }
        });
        Ok(Ack::new(format!("Job submitted: {job}")))
    }

    /// Start `parties` tasks that each work for a while and then meet at the barrier
    pub fn run_barrier_round(&self, parties: usize) -> CoordResult<Ack> {
        debug!(parties, "PatternService::run_barrier_round: called");
        self.ensure_open("barrier")?;

        for task_id in 1..=parties {
            let barrier = Arc::clone(&self.barrier);
            let cancel = self.cancel.clone();
            let timeout = self.barrier_timeout;
            let max_delay = self.max_arrival_delay;
            self.tracker.spawn(async move {
                info!(task_id, "Task {} is performing...", task_id);
                let never = CancellationToken::new();
                let arrived = async {
                    sleep_or_cancel(random_delay(max_delay), &cancel, &never, "barrier").await?;
                    info!(task_id, "Task {} reached the barrier.", task_id);
                    barrier.arrive_with_cancel(timeout, &cancel).await
                };
                match arrived.await {
                    Ok(result) => debug!(task_id, generation = result.generation, "Party released"),
                    Err(e) => report("barrier", &format!("task-{task_id}"), &e),
                }
            });
        }
        Ok(Ack::new("Tasks started"))
    }

    /// Launch `n` futures, wait for all of them and return the combined result
    pub async fn launch_future_batch(&self, n: usize) -> CoordResult<String> {
        debug!(n, "PatternService::launch_future_batch: called");
        match self.futures.run_batch(n).await {
            Ok(combined) => Ok(format!("All tasks completed: {combined}")),
            Err(e) => {
                report("futures", &format!("batch-of-{n}"), &e);
                Err(e)
            }
        }
    }

    /// Hand an order to the channel
    ///
    /// Acknowledges once the order holds its place in line; a full channel
    /// finishes the put in the background.
    pub fn produce(&self, order: impl Into<Job>) -> CoordResult<Ack> {
        let order = order.into();
        debug!(%order, "PatternService::produce: called");
        self.ensure_open("channel")?;

        let pending = self
            .channel
            .reserve_put(order.clone())
            .inspect_err(|e| report("channel", order.as_str(), e))?;
        if !pending.is_queued() {
            let cancel = self.cancel.clone();
            self.tracker.spawn(async move {
                let spawned = pending.job().clone();
                if let Err(e) = pending.send_with_cancel(&cancel).await {
                    report("channel", spawned.as_str(), &e);
                }
            });
        }
        Ok(Ack::new(format!("Order produced: {order}")))
    }

    /// Start the consuming loop
    pub fn start_consuming(&self) -> CoordResult<Ack> {
        debug!("PatternService::start_consuming: called");
        if let Err(e) = self.channel.start_consuming() {
            report("channel", "consumer", &e);
            return Err(e);
        }
        Ok(Ack::new("Started consuming orders"))
    }

    pub async fn read_shared(&self) -> CoordResult<String> {
        debug!("PatternService::read_shared: called");
        self.record.read_with_cancel(&self.cancel).await.inspect_err(|e| report("rwlock", "read", e))
    }

    /// Replace the shared value; acknowledges before the write happens
    pub fn write_shared(&self, value: impl Into<String>) -> CoordResult<Ack> {
        let value = value.into();
        debug!(%value, "PatternService::write_shared: called");
        self.ensure_open("rwlock")?;

        let record = Arc::clone(&self.record);
        let cancel = self.cancel.clone();
        let spawned = value.clone();
        self.tracker.spawn(async move {
            if let Err(e) = record.write_with_cancel(spawned.clone(), &cancel).await {
                report("rwlock", &spawned, &e);
            }
        });
        Ok(Ack::new(format!("Data write initiated: {value}")))
    }

    /// Invoke a task on the active object and wait for its result
    pub async fn run_task(&self, name: &str) -> CoordResult<String> {
        debug!(%name, "PatternService::run_task: called");
        let result = match self.active.invoke(name) {
            Ok(handle) => ActiveObjectExecutor::resolve(&handle).await,
            Err(e) => Err(e),
        };
        result.inspect_err(|e| report("active", name, e))
    }

    /// Queue one simulated task on the worker pool
    pub fn submit_pooled_task(&self, id: impl Into<TaskId>) -> CoordResult<Ack> {
        let id = id.into();
        debug!(%id, "PatternService::submit_pooled_task: called");
        self.pool
            .submit(id)
            .map(|_| Ack::new(format!("Task {id} submitted")))
            .inspect_err(|e| report("pool", &id.to_string(), e))
    }

    /// Queue tasks 1..=count on the worker pool
    pub fn submit_pooled_batch(&self, count: u64) -> CoordResult<Ack> {
        debug!(count, "PatternService::submit_pooled_batch: called");
        for id in 1..=count {
            self.submit_pooled_task(id)?;
        }
        Ok(Ack::new("Tasks submitted"))
    }

    pub fn monitor(&self) -> &MonitorQueue {
        &self.monitor
    }

    pub fn record(&self) -> &SharedRecord {
        &self.record
    }

    pub fn barrier(&self) -> &Barrier {
        &self.barrier
    }

    pub fn channel(&self) -> &BoundedChannel {
        &self.channel
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Wait for every acknowledged unit and every pooled task to finish
    ///
    /// The consuming loop is not waited for; it runs until shutdown.
    pub async fn wait_background(&self) {
        debug!("PatternService::wait_background: called");
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
        self.pool.wait_idle().await;
    }

    /// Stop every component and wait for their units to exit
    pub async fn shutdown(&self) {
        debug!("PatternService::shutdown: called");
        self.cancel.cancel();
        self.monitor.shutdown();
        self.record.shutdown();
        self.barrier.shutdown();
        self.channel.shutdown();

        self.tracker.close();
        self.tracker.wait().await;
        self.pool.shutdown().await;
        self.futures.shutdown().await;
        self.active.shutdown().await;
        self.channel.join().await;
        info!("Pattern service stopped");
    }

    fn ensure_open(&self, component: &'static str) -> CoordResult<()> {
        if self.cancel.is_cancelled() {
            return Err(CoordError::Closed(component));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.monitor.print_duration_ms = 100;
        config.barrier.max_arrival_delay_ms = 50;
        config.channel.processing_delay_ms = 10;
        config.pool.max_task_delay_ms = 50;
        config.futures.max_delay_ms = 50;
        config.active.task_duration_ms = 200;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_print_job_is_acknowledged_then_processed() {
        let service = PatternService::new(&fast_config());

        let ack = service.submit_print_job("report").unwrap();
        assert_eq!(ack.message(), "Job submitted: report");

        service.wait_background().await;
        assert_eq!(service.monitor().completed(), vec![Job::from("report")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_print_jobs_processed_in_acknowledged_order() {
        let mut config = fast_config();
        config.monitor.print_duration_ms = 1;
        let service = PatternService::new(&config);

        for round in 0..5 {
            let jobs: Vec<String> = (0..16).map(|i| format!("r{round}-j{i}")).collect();
            for job in &jobs {
                service.submit_print_job(job.as_str()).unwrap();
            }
            service.wait_background().await;

            let completed: Vec<_> = service.monitor().completed().into_iter().map(Job::into_inner).collect();
            assert_eq!(completed[completed.len() - 16..], jobs[..], "round {round}");
        }

        service.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_orders_consumed_in_acknowledged_order_when_full() {
        let mut config = fast_config();
        config.channel.capacity = Some(2);
        config.channel.processing_delay_ms = 1;
        let service = PatternService::new(&config);
        service.start_consuming().unwrap();

        let orders: Vec<String> = (0..16).map(|i| format!("o{i}")).collect();
        for order in &orders {
            service.produce(order.as_str()).unwrap();
        }
        service.wait_background().await;
        service.channel().wait_consumed(16).await.unwrap();

        let consumed: Vec<_> = service.channel().consumed().into_iter().map(Job::into_inner).collect();
        assert_eq!(consumed, orders);

        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_limit_applies_to_components() {
        let mut config = fast_config();
        config.history_limit = 4;
        let service = PatternService::new(&config);

        service.submit_pooled_batch(10).unwrap();
        for i in 0..10 {
            service.write_shared(format!("v{i}")).unwrap();
        }
        service.wait_background().await;

        assert_eq!(service.pool().executions().len(), 4);
        assert_eq!(service.record().events().len(), 4);
        assert_eq!(service.pool().stats().completed, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_barrier_round_releases_all_parties() {
        let service = PatternService::new(&fast_config());

        assert_eq!(service.run_barrier_round(5).unwrap().message(), "Tasks started");
        service.wait_background().await;

        assert_eq!(service.barrier().rounds_completed(), 1);
        assert_eq!(service.barrier().waiting(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_barrier_round_times_out_and_withdraws() {
        let mut config = fast_config();
        config.barrier.timeout_ms = Some(1000);
        let service = PatternService::new(&config);

        service.run_barrier_round(3).unwrap();
        service.wait_background().await;

        assert_eq!(service.barrier().rounds_completed(), 0);
        assert_eq!(service.barrier().waiting(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_future_batch_reports_combined_result() {
        let service = PatternService::new(&fast_config());

        let result = service.launch_future_batch(5).await.unwrap();

        assert!(result.starts_with("All tasks completed: "));
        for k in 1..=5 {
            assert!(result.contains(&format!("Task {k} completed")));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_orders_flow_through_consumer() {
        let service = PatternService::new(&fast_config());

        assert_eq!(service.produce("o1").unwrap().message(), "Order produced: o1");
        service.wait_background().await;
        service.produce("o2").unwrap();
        service.wait_background().await;

        assert_eq!(service.start_consuming().unwrap().message(), "Started consuming orders");
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(service.channel().consumed(), vec![Job::from("o1"), Job::from("o2")]);
        assert!(matches!(service.start_consuming(), Err(CoordError::AlreadyRunning(_))));

        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_and_write_shared() {
        let service = PatternService::new(&fast_config());
        assert_eq!(service.read_shared().await.unwrap(), "Initial Data");

        let ack = service.write_shared("updated").unwrap();
        assert_eq!(ack.message(), "Data write initiated: updated");
        service.wait_background().await;

        assert_eq!(service.read_shared().await.unwrap(), "updated");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_task_blocks_for_result() {
        let service = PatternService::new(&fast_config());
        let start = tokio::time::Instant::now();

        assert_eq!(service.run_task("X").await.unwrap(), "Task X completed");
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pooled_tasks_complete() {
        let service = PatternService::new(&fast_config());

        assert_eq!(service.submit_pooled_task(7u64).unwrap().message(), "Task 7 submitted");
        assert_eq!(service.submit_pooled_batch(10).unwrap().message(), "Tasks submitted");
        service.wait_background().await;

        let stats = service.pool().stats();
        assert_eq!(stats.completed, 11);
        assert!(stats.peak_concurrent <= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_rejects_new_work() {
        let service = PatternService::new(&fast_config());
        service.submit_print_job("in-flight").unwrap();

        service.shutdown().await;

        assert_eq!(service.submit_print_job("late"), Err(CoordError::Closed("monitor")));
        assert_eq!(service.produce("late"), Err(CoordError::Closed("channel")));
        assert!(matches!(service.run_task("late").await, Err(CoordError::Closed("active"))));
        assert!(service.monitor().completed().is_empty());
    }
}
