//! MonitorQueue - FIFO-serialized job execution
//!
//! Jobs are processed one at a time in submission order. Each submitter
//! holds a ticket in a shared queue and is woken only when its ticket
//! reaches the front, so finishing a job wakes exactly one waiter instead
//! of the whole queue.
//!
//! Taking a ticket is synchronous ([`MonitorQueue::enqueue`]); a caller
//! that acknowledges a job before running it enqueues first, so the order
//! of acknowledgements is the order of processing.
//!
//! A [`QueuedJob`] that is cancelled (or dropped) removes its own ticket on
//! the way out, so the front of the queue always belongs to a live
//! submitter.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::delay::{cancelled_any, sleep_or_cancel};
use crate::domain::Job;
use crate::error::{CoordError, CoordResult};
use crate::history::History;

const COMPONENT: &str = "monitor";

/// Ordering events recorded by the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// Job joined the queue
    Enqueued(Job),
    /// Job reached the front and began its action
    Started(Job),
    /// Job finished its action and left the queue
    Completed(Job),
    /// Job left the queue without completing (cancelled)
    Withdrawn(Job),
}

struct Waiter {
    ticket: u64,
    job: Job,
    wake: Arc<Notify>,
}

#[derive(Default)]
struct MonitorInner {
    queue: VecDeque<Waiter>,
    next_ticket: u64,
    history: History<MonitorEvent>,
}

fn lock(inner: &Mutex<MonitorInner>) -> MutexGuard<'_, MonitorInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mutual-exclusion queue with FIFO-fair wakeup
pub struct MonitorQueue {
    inner: Arc<Mutex<MonitorInner>>,
    print_duration: Duration,
    cancel: CancellationToken,
}

impl MonitorQueue {
    /// Create a queue whose action takes `print_duration`
    pub fn new(print_duration: Duration) -> Self {
        debug!(?print_duration, "MonitorQueue::new: called");
        Self {
            inner: Arc::new(Mutex::new(MonitorInner::default())),
            print_duration,
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.print_duration())
    }

    /// Keep only the most recent `limit` events
    pub fn with_history_limit(self, limit: usize) -> Self {
        lock(&self.inner).history = History::new(limit);
        self
    }

    /// Take the next ticket for `job` without waiting
    ///
    /// The job holds its place in line from this call on; run the returned
    /// [`QueuedJob`] to wait for the front and process it.
    pub fn enqueue(&self, job: impl Into<Job>) -> CoordResult<QueuedJob> {
        let job = job.into();
        debug!(%job, "MonitorQueue::enqueue: called");

        if self.cancel.is_cancelled() {
            return Err(CoordError::Closed(COMPONENT));
        }

        let wake = Arc::new(Notify::new());
        let ticket = {
            let mut inner = lock(&self.inner);
            let ticket = inner.next_ticket;
            inner.next_ticket += 1;
            inner.queue.push_back(Waiter {
                ticket,
                job: job.clone(),
                wake: Arc::clone(&wake),
            });
            inner.history.push(MonitorEvent::Enqueued(job.clone()));
            ticket
        };
        info!(%job, ticket, "Adding job to queue");

        Ok(QueuedJob {
            inner: Arc::clone(&self.inner),
            ticket,
            job,
            wake,
            print_duration: self.print_duration,
            queue_cancel: self.cancel.clone(),
            completed: false,
        })
    }

    /// Submit a job and wait until it has been processed
    pub async fn submit(&self, job: impl Into<Job>) -> CoordResult<()> {
        self.submit_with_cancel(job, &CancellationToken::new()).await
    }

    /// Submit a job; `cancel` withdraws it at any point before completion
    pub async fn submit_with_cancel(&self, job: impl Into<Job>, cancel: &CancellationToken) -> CoordResult<()> {
        self.enqueue(job)?.run_with_cancel(cancel).await
    }

    /// Number of jobs currently queued (including the one being processed)
    pub fn pending(&self) -> usize {
        lock(&self.inner).queue.len()
    }

    /// Recent events in the order they happened
    pub fn history(&self) -> Vec<MonitorEvent> {
        lock(&self.inner).history.to_vec()
    }

    /// Recently finished jobs, in completion order
    pub fn completed(&self) -> Vec<Job> {
        lock(&self.inner)
            .history
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::Completed(job) => Some(job.clone()),
                _ => None,
            })
            .collect()
    }

    /// Cancel every queued and in-progress job; later submissions are rejected
    pub fn shutdown(&self) {
        debug!("MonitorQueue::shutdown: called");
        self.cancel.cancel();
    }
}

/// A job holding its place in the queue
///
/// Dropping it before it completes withdraws the job and, if it was at the
/// front, wakes the next one.
pub struct QueuedJob {
    inner: Arc<Mutex<MonitorInner>>,
    ticket: u64,
    job: Job,
    wake: Arc<Notify>,
    print_duration: Duration,
    queue_cancel: CancellationToken,
    completed: bool,
}

impl QueuedJob {
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    /// Wait for the front of the queue, then process the job
    pub async fn run(self) -> CoordResult<()> {
        self.run_with_cancel(&CancellationToken::new()).await
    }

    pub async fn run_with_cancel(mut self, cancel: &CancellationToken) -> CoordResult<()> {
        let ticket = self.ticket;
        let job = self.job.clone();

        while !self.is_front() {
            debug!(%job, ticket, "QueuedJob::run: waiting for front");
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = cancelled_any(&self.queue_cancel, cancel) => {
                    warn!(%job, ticket, "Job cancelled while queued");
                    return Err(CoordError::Cancelled(COMPONENT));
                }
            }
        }

        lock(&self.inner).history.push(MonitorEvent::Started(job.clone()));
        info!(%job, "Printing job");

        if let Err(e) = sleep_or_cancel(self.print_duration, &self.queue_cancel, cancel, COMPONENT).await {
            warn!(%job, "Job cancelled while printing");
            return Err(e);
        }

        self.completed = true;
        drop(self);
        info!(%job, "Job completed");
        Ok(())
    }

    fn is_front(&self) -> bool {
        lock(&self.inner)
            .queue
            .front()
            .map(|w| w.ticket == self.ticket)
            .unwrap_or(false)
    }
}

impl Drop for QueuedJob {
    fn drop(&mut self) {
        let mut inner = lock(&self.inner);
        let Some(position) = inner.queue.iter().position(|w| w.ticket == self.ticket) else {
            error!(ticket = self.ticket, "QueuedJob::drop: ticket missing from queue");
            return;
        };

        if self.completed && position != 0 {
            error!(ticket = self.ticket, position, "QueuedJob::drop: completed job was not at the front");
        }

        let Some(waiter) = inner.queue.remove(position) else {
            return;
        };
        let event = if self.completed {
            MonitorEvent::Completed(waiter.job)
        } else {
            MonitorEvent::Withdrawn(waiter.job)
        };
        inner.history.push(event);

        // Only the new front needs to know; everyone else is still behind it
        if position == 0
            && let Some(next) = inner.queue.front()
        {
            debug!(ticket = next.ticket, "QueuedJob::drop: waking new front");
            next.wake.notify_one();
        }
    }
}
