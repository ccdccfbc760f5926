//! BoundedChannel - FIFO producer/consumer queue
//!
//! Two semaphores track the queue: `items` holds one permit per queued job
//! and `slots` (bounded channels only) one permit per free place. A permit
//! is only converted into a queue operation after it has been acquired, so
//! a cancelled `put` or `take` never touches the queue.
//!
//! Producers are ordered by a ticket taken synchronously in
//! [`BoundedChannel::reserve_put`]. When nobody is waiting and a slot is
//! free the job is queued on the spot; otherwise the [`PendingPut`] waits
//! for its turn and then for a slot, so puts land in reservation order.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::ChannelConfig;
use crate::delay::{cancelled_any, sleep_or_cancel};
use crate::domain::Job;
use crate::error::{CoordError, CoordResult};
use crate::history::History;

const COMPONENT: &str = "channel";

#[derive(Default)]
struct ChannelState {
    queue: VecDeque<Job>,
    /// Next producer ticket to hand out
    next_ticket: u64,
    /// Tickets given up before their turn came
    abandoned: BTreeSet<u64>,
    produced: u64,
    consumed: History<Job>,
}

/// State shared by the channel, its consumer and pending puts
struct ChannelShared {
    state: Mutex<ChannelState>,
    items: Semaphore,
    slots: Option<Semaphore>,
    /// Producer ticket whose turn it is
    serving: watch::Sender<u64>,
    /// Jobs taken by the consuming loop so far
    consumed_total: watch::Sender<u64>,
    cancel: CancellationToken,
}

impl ChannelShared {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append under the lock; the caller already owns a slot
    fn push(&self, state: &mut ChannelState, job: Job) {
        info!(%job, "Produced order");
        state.queue.push_back(job);
        state.produced += 1;
        self.items.add_permits(1);
    }

    /// Hand the turn on from `ticket`, or mark it abandoned if it never came
    fn release_turn(&self, ticket: u64) {
        let mut state = self.lock();
        let current = *self.serving.borrow();
        if current == ticket {
            let mut next = ticket + 1;
            while state.abandoned.remove(&next) {
                next += 1;
            }
            self.serving.send_replace(next);
        } else {
            state.abandoned.insert(ticket);
        }
    }
}

/// Blocking FIFO channel of jobs with an optional capacity
pub struct BoundedChannel {
    shared: Arc<ChannelShared>,
    capacity: Option<usize>,
    processing_delay: Duration,
    consuming: AtomicBool,
    tracker: TaskTracker,
}

impl BoundedChannel {
    /// Create a channel; `capacity` of None is unbounded
    pub fn new(capacity: Option<usize>, processing_delay: Duration) -> Self {
        debug!(?capacity, ?processing_delay, "BoundedChannel::new: called");
        let capacity = capacity.map(|c| c.max(1));
        let (serving, _) = watch::channel(0);
        let (consumed_total, _) = watch::channel(0);
        Self {
            shared: Arc::new(ChannelShared {
                state: Mutex::new(ChannelState::default()),
                items: Semaphore::new(0),
                slots: capacity.map(Semaphore::new),
                serving,
                consumed_total,
                cancel: CancellationToken::new(),
            }),
            capacity,
            processing_delay,
            consuming: AtomicBool::new(false),
            tracker: TaskTracker::new(),
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(config.capacity, config.processing_delay())
    }

    /// Keep only the most recent `limit` consumed jobs
    pub fn with_history_limit(self, limit: usize) -> Self {
        self.shared.lock().consumed = History::new(limit);
        self
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Jobs currently queued
    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take a producer's place in line without waiting
    ///
    /// An unbounded channel, or a bounded one with a free slot and no
    /// earlier producer waiting, queues the job before returning.
    pub fn reserve_put(&self, job: impl Into<Job>) -> CoordResult<PendingPut> {
        let job = job.into();
        debug!(%job, "BoundedChannel::reserve_put: called");

        if self.shared.cancel.is_cancelled() {
            return Err(CoordError::Closed(COMPONENT));
        }

        let mut state = self.shared.lock();
        let nobody_waiting = *self.shared.serving.borrow() == state.next_ticket;
        let slot_free = match &self.shared.slots {
            None => true,
            Some(slots) => nobody_waiting && slots.try_acquire().map(|permit| permit.forget()).is_ok(),
        };

        if nobody_waiting && slot_free {
            self.shared.push(&mut state, job.clone());
            return Ok(PendingPut {
                shared: Arc::clone(&self.shared),
                job,
                ticket: None,
            });
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        debug!(%job, ticket, "BoundedChannel::reserve_put: waiting for a slot");
        Ok(PendingPut {
            shared: Arc::clone(&self.shared),
            job,
            ticket: Some(ticket),
        })
    }

    /// Append a job, waiting for a free slot if the channel is full
    pub async fn put(&self, job: impl Into<Job>) -> CoordResult<()> {
        self.put_with_cancel(job, &CancellationToken::new()).await
    }

    pub async fn put_with_cancel(&self, job: impl Into<Job>, cancel: &CancellationToken) -> CoordResult<()> {
        self.reserve_put(job)?.send_with_cancel(cancel).await
    }

    /// Remove the oldest job, waiting until one is available
    pub async fn take(&self) -> CoordResult<Job> {
        self.take_with_cancel(&CancellationToken::new()).await
    }

    pub async fn take_with_cancel(&self, cancel: &CancellationToken) -> CoordResult<Job> {
        debug!("BoundedChannel::take: called");
        let shared = &self.shared;

        tokio::select! {
            permit = shared.items.acquire() => match permit {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(CoordError::Closed(COMPONENT)),
            },
            _ = cancelled_any(&shared.cancel, cancel) => {
                debug!("BoundedChannel::take: cancelled while empty");
                return Err(CoordError::Cancelled(COMPONENT));
            }
        }

        let Some(job) = shared.lock().queue.pop_front() else {
            error!("BoundedChannel::take: item permit without a queued job");
            return Err(CoordError::InvariantViolation(
                "channel item count out of sync with queue".to_string(),
            ));
        };
        if let Some(slots) = &shared.slots {
            slots.add_permits(1);
        }
        Ok(job)
    }

    /// Start the single consuming loop
    ///
    /// The loop takes jobs in order, spends `processing_delay` on each and
    /// runs until the channel is shut down.
    pub fn start_consuming(self: &Arc<Self>) -> CoordResult<()> {
        debug!("BoundedChannel::start_consuming: called");
        if self.shared.cancel.is_cancelled() {
            return Err(CoordError::Closed(COMPONENT));
        }
        if self.consuming.swap(true, Ordering::SeqCst) {
            return Err(CoordError::AlreadyRunning(COMPONENT));
        }

        let channel = Arc::clone(self);
        self.tracker.spawn(async move { channel.consume_loop().await });
        info!("Started consuming orders");
        Ok(())
    }

    pub fn is_consuming(&self) -> bool {
        self.consuming.load(Ordering::SeqCst)
    }

    /// Recently consumed jobs, in consumption order
    pub fn consumed(&self) -> Vec<Job> {
        self.shared.lock().consumed.to_vec()
    }

    /// Jobs taken by the consuming loop since the channel was created
    pub fn consumed_count(&self) -> u64 {
        *self.shared.consumed_total.borrow()
    }

    /// Jobs queued since the channel was created
    pub fn produced_count(&self) -> u64 {
        self.shared.lock().produced
    }

    /// Wait until the consuming loop has taken `count` jobs in total
    pub async fn wait_consumed(&self, count: u64) -> CoordResult<()> {
        debug!(count, "BoundedChannel::wait_consumed: called");
        let mut rx = self.shared.consumed_total.subscribe();
        tokio::select! {
            reached = rx.wait_for(|total| *total >= count) => reached
                .map(drop)
                .map_err(|_| CoordError::Closed(COMPONENT)),
            _ = self.shared.cancel.cancelled() => Err(CoordError::Cancelled(COMPONENT)),
        }
    }

    /// Cancel blocked producers and consumers and stop the consuming loop
    pub fn shutdown(&self) {
        debug!("BoundedChannel::shutdown: called");
        self.shared.cancel.cancel();
        self.tracker.close();
    }

    /// Wait for the consuming loop to exit after `shutdown`
    pub async fn join(&self) {
        self.tracker.wait().await;
    }

    async fn consume_loop(&self) {
        let never = CancellationToken::new();
        loop {
            let job = match self.take_with_cancel(&never).await {
                Ok(job) => job,
                Err(e) => {
                    debug!(error = %e, "BoundedChannel::consume_loop: stopping");
                    break;
                }
            };
            info!(%job, "Consumed order");
            self.shared.lock().consumed.push(job);
            self.shared.consumed_total.send_modify(|total| *total += 1);

            if sleep_or_cancel(self.processing_delay, &self.shared.cancel, &never, COMPONENT)
                .await
                .is_err()
            {
                break;
            }
        }
        info!("Stopped consuming orders");
    }
}

/// A producer holding its place in line
///
/// Dropping it before the job is queued gives up the place without
/// holding back the producers behind it.
pub struct PendingPut {
    shared: Arc<ChannelShared>,
    job: Job,
    /// None once the job is in the queue
    ticket: Option<u64>,
}

impl PendingPut {
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Already in the queue?
    pub fn is_queued(&self) -> bool {
        self.ticket.is_none()
    }

    /// Wait for this producer's turn and a free slot, then queue the job
    pub async fn send(self) -> CoordResult<()> {
        self.send_with_cancel(&CancellationToken::new()).await
    }

    pub async fn send_with_cancel(mut self, cancel: &CancellationToken) -> CoordResult<()> {
        let Some(ticket) = self.ticket else {
            return Ok(());
        };
        let shared = Arc::clone(&self.shared);

        let mut turn = shared.serving.subscribe();
        tokio::select! {
            reached = turn.wait_for(|serving| *serving == ticket) => {
                reached.map(drop).map_err(|_| CoordError::Closed(COMPONENT))?;
            }
            _ = cancelled_any(&shared.cancel, cancel) => {
                warn!(job = %self.job, "Put cancelled while waiting for its turn");
                return Err(CoordError::Cancelled(COMPONENT));
            }
        }

        if let Some(slots) = &shared.slots {
            tokio::select! {
                permit = slots.acquire() => match permit {
                    Ok(permit) => permit.forget(),
                    Err(_) => return Err(CoordError::Closed(COMPONENT)),
                },
                _ = cancelled_any(&shared.cancel, cancel) => {
                    warn!(job = %self.job, "Put cancelled while channel full");
                    return Err(CoordError::Cancelled(COMPONENT));
                }
            }
        }

        {
            let mut state = shared.lock();
            shared.push(&mut state, self.job.clone());
        }
        self.ticket = None;
        shared.release_turn(ticket);
        Ok(())
    }
}

impl Drop for PendingPut {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            debug!(job = %self.job, ticket, "PendingPut::drop: giving up turn");
            self.shared.release_turn(ticket);
        }
    }
}
