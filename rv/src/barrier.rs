//! Barrier - reusable N-party rendezvous
//!
//! The Nth arrival of a round runs the completion action, resets the count
//! and advances the generation, which releases every waiter of that round
//! at once. Waiters compare against the generation they arrived in, so an
//! early arrival for the next round can never be mistaken for a waiter of
//! the previous one.
//!
//! A party that is cancelled or times out withdraws its arrival; the others
//! keep waiting for a full set. A completion action that panics breaks the
//! barrier for good: every current and later party gets
//! `CoordError::InvariantViolation`.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BarrierConfig;
use crate::delay::cancelled_any;
use crate::error::{CoordError, CoordResult};

const COMPONENT: &str = "barrier";

/// Action run once per round by the last party to arrive
///
/// Receives the generation that just completed. It runs while the barrier
/// is locked, so it must not call back into the same barrier.
pub type CompletionAction = Box<dyn Fn(u64) + Send + Sync>;

/// What a party learns when it is released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierWaitResult {
    /// Round this party took part in
    pub generation: u64,
    /// True for the party that completed the round and ran the action
    pub is_leader: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Release {
    /// Number of completed rounds
    completed: u64,
    broken: bool,
}

struct BarrierState {
    count: usize,
    generation: u64,
    broken: Option<String>,
}

/// N-party rendezvous with a per-round completion action
pub struct Barrier {
    parties: usize,
    state: Mutex<BarrierState>,
    release: watch::Sender<Release>,
    action: CompletionAction,
    cancel: CancellationToken,
}

impl Barrier {
    /// Create a barrier for `parties` parties
    ///
    /// `parties` must be at least 1.
    pub fn new(parties: usize, action: CompletionAction) -> Self {
        debug!(parties, "Barrier::new: called");
        let (release, _) = watch::channel(Release::default());
        Self {
            parties: parties.max(1),
            state: Mutex::new(BarrierState {
                count: 0,
                generation: 0,
                broken: None,
            }),
            release,
            action,
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &BarrierConfig, action: CompletionAction) -> Self {
        Self::new(config.parties, action)
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Parties currently waiting in the open round
    pub fn waiting(&self) -> usize {
        self.lock().count
    }

    /// Rounds released so far
    pub fn rounds_completed(&self) -> u64 {
        self.lock().generation
    }

    pub fn is_broken(&self) -> bool {
        self.lock().broken.is_some()
    }

    /// Arrive and wait (without limit) for the round to complete
    pub async fn arrive(&self) -> CoordResult<BarrierWaitResult> {
        self.arrive_with_cancel(None, &CancellationToken::new()).await
    }

    /// Arrive and wait at most `timeout`; on timeout the arrival is withdrawn
    pub async fn arrive_timeout(&self, timeout: Duration) -> CoordResult<BarrierWaitResult> {
        self.arrive_with_cancel(Some(timeout), &CancellationToken::new()).await
    }

    pub async fn arrive_with_cancel(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> CoordResult<BarrierWaitResult> {
        debug!(?timeout, "Barrier::arrive: called");

        let (generation, mut rx) = {
            let mut state = self.lock();
            if let Some(reason) = &state.broken {
                return Err(CoordError::InvariantViolation(reason.clone()));
            }
            if self.cancel.is_cancelled() {
                return Err(CoordError::Closed(COMPONENT));
            }

            let generation = state.generation;
            state.count += 1;
            debug!(generation, count = state.count, parties = self.parties, "Barrier::arrive: arrived");

            if state.count == self.parties {
                return self.complete_round(&mut state);
            }
            (generation, self.release.subscribe())
        };

        let arrival = Arrival {
            barrier: self,
            generation,
            active: true,
        };

        let deadline = async {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            released = rx.wait_for(|r| r.broken || r.completed > generation) => {
                let broken = released.map(|r| r.broken).unwrap_or(true);
                arrival.release();
                if broken {
                    return Err(self.broken_error());
                }
                Ok(BarrierWaitResult { generation, is_leader: false })
            }
            _ = cancelled_any(&self.cancel, cancel) => {
                if arrival.withdraw() {
                    warn!(generation, "Party cancelled at barrier");
                    return Err(CoordError::Cancelled(COMPONENT));
                }
                Ok(BarrierWaitResult { generation, is_leader: false })
            }
            _ = deadline => {
                if arrival.withdraw() {
                    warn!(generation, ?timeout, "Party timed out at barrier");
                    return Err(CoordError::Timeout(timeout.unwrap_or_default()));
                }
                Ok(BarrierWaitResult { generation, is_leader: false })
            }
        }
    }

    /// Cancel every waiting party; later arrivals are rejected
    pub fn shutdown(&self) {
        debug!("Barrier::shutdown: called");
        self.cancel.cancel();
    }

    /// Run the action and release the round; called with the state locked
    fn complete_round(&self, state: &mut BarrierState) -> CoordResult<BarrierWaitResult> {
        let generation = state.generation;
        info!(generation, parties = self.parties, "All parties arrived, running completion action");

        if catch_unwind(AssertUnwindSafe(|| (self.action)(generation))).is_err() {
            let reason = format!("barrier completion action panicked in round {generation}");
            error!(generation, "Completion action panicked, barrier is broken");
            state.broken = Some(reason.clone());
            state.count = 0;
            self.release.send_modify(|r| r.broken = true);
            return Err(CoordError::InvariantViolation(reason));
        }

        state.count = 0;
        state.generation += 1;
        let completed = state.generation;
        self.release.send_modify(|r| r.completed = completed);
        Ok(BarrierWaitResult {
            generation,
            is_leader: true,
        })
    }

    fn broken_error(&self) -> CoordError {
        let reason = self
            .lock()
            .broken
            .clone()
            .unwrap_or_else(|| "barrier released without a completed round".to_string());
        CoordError::InvariantViolation(reason)
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A counted arrival that is withdrawn if its waiter goes away early
struct Arrival<'a> {
    barrier: &'a Barrier,
    generation: u64,
    active: bool,
}

impl Arrival<'_> {
    /// Round finished normally; nothing to undo
    fn release(mut self) {
        self.active = false;
    }

    /// Take the arrival back if its round is still open
    ///
    /// Returns false if the round completed first, in which case the party
    /// counts as released.
    fn withdraw(mut self) -> bool {
        self.active = false;
        self.undo()
    }

    fn undo(&self) -> bool {
        let mut state = self.barrier.lock();
        if state.generation != self.generation || state.broken.is_some() {
            return false;
        }
        state.count = state.count.saturating_sub(1);
        debug!(generation = self.generation, count = state.count, "Arrival: withdrawn");
        true
    }
}

impl Drop for Arrival<'_> {
    fn drop(&mut self) {
        if self.active {
            self.undo();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_barrier(parties: usize) -> (Arc<Barrier>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let barrier = Barrier::new(
            parties,
            Box::new(move |_: u64| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (Arc::new(barrier), runs)
    }

    async fn run_round(barrier: &Arc<Barrier>, parties: usize) -> Vec<BarrierWaitResult> {
        let mut tasks = Vec::new();
        for _ in 0..parties {
            let barrier = Arc::clone(barrier);
            tasks.push(tokio::spawn(async move { barrier.arrive().await }));
        }
        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap().unwrap());
        }
        results
    }

    #[tokio::test]
    async fn test_five_parties_release_together() {
        let (barrier, runs) = counting_barrier(5);

        let results = run_round(&barrier, 5).await;

        assert_eq!(results.len(), 5);
        assert_eq!(results.iter().filter(|r| r.is_leader).count(), 1);
        assert!(results.iter().all(|r| r.generation == 0));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(barrier.waiting(), 0);
        assert_eq!(barrier.rounds_completed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_round_keeps_waiting() {
        let (barrier, runs) = counting_barrier(5);

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let barrier = Arc::clone(&barrier);
            tasks.push(tokio::spawn(async move { barrier.arrive().await }));
        }
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(barrier.waiting(), 4);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(tasks.iter().all(|t| !t.is_finished()));

        // Fifth party completes the round
        barrier.arrive().await.unwrap();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_barrier_is_reusable() {
        let (barrier, runs) = counting_barrier(5);

        let first = run_round(&barrier, 5).await;
        let second = run_round(&barrier, 5).await;

        assert!(first.iter().all(|r| r.generation == 0));
        assert!(second.iter().all(|r| r.generation == 1));
        assert_eq!(second.iter().filter(|r| r.is_leader).count(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(barrier.waiting(), 0);
    }

    #[tokio::test]
    async fn test_single_party_barrier_releases_immediately() {
        let (barrier, runs) = counting_barrier(1);
        let result = barrier.arrive().await.unwrap();
        assert!(result.is_leader);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_withdraws_arrival() {
        let (barrier, runs) = counting_barrier(3);

        let a = {
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move { barrier.arrive_timeout(Duration::from_secs(1)).await })
        };
        let b = {
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move { barrier.arrive_timeout(Duration::from_secs(1)).await })
        };

        assert_eq!(a.await.unwrap(), Err(CoordError::Timeout(Duration::from_secs(1))));
        assert_eq!(b.await.unwrap(), Err(CoordError::Timeout(Duration::from_secs(1))));
        assert_eq!(barrier.waiting(), 0);

        // The withdrawn parties do not count toward a fresh round
        let results = run_round(&barrier, 3).await;
        assert!(results.iter().all(|r| r.generation == 0));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_withdraws_arrival() {
        let (barrier, _runs) = counting_barrier(2);
        let token = CancellationToken::new();

        let waiting = {
            let barrier = Arc::clone(&barrier);
            let token = token.clone();
            tokio::spawn(async move { barrier.arrive_with_cancel(None, &token).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(barrier.waiting(), 1);

        token.cancel();
        assert_eq!(waiting.await.unwrap(), Err(CoordError::Cancelled("barrier")));
        assert_eq!(barrier.waiting(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_waiter_withdraws() {
        let (barrier, _runs) = counting_barrier(2);

        let gave_up = tokio::time::timeout(Duration::from_millis(10), barrier.arrive()).await;
        assert!(gave_up.is_err());
        assert_eq!(barrier.waiting(), 0);
    }

    #[tokio::test]
    async fn test_panicking_action_breaks_barrier() {
        let barrier = Arc::new(Barrier::new(2, Box::new(|_: u64| panic!("action failed"))));

        let waiter = {
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move { barrier.arrive().await })
        };
        tokio::task::yield_now().await;

        let leader = barrier.arrive().await;
        assert!(matches!(leader, Err(CoordError::InvariantViolation(_))));
        assert!(matches!(waiter.await.unwrap(), Err(CoordError::InvariantViolation(_))));

        assert!(barrier.is_broken());
        assert!(matches!(barrier.arrive().await, Err(CoordError::InvariantViolation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_waiters() {
        let (barrier, _runs) = counting_barrier(3);
        let waiting = {
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move { barrier.arrive().await })
        };
        tokio::task::yield_now().await;

        barrier.shutdown();
        assert_eq!(waiting.await.unwrap(), Err(CoordError::Cancelled("barrier")));
        assert_eq!(barrier.arrive().await, Err(CoordError::Closed("barrier")));
    }
}
