//! SharedRecord - multi-reader/single-writer cell
//!
//! Backed by `tokio::sync::RwLock`, which queues lock requests in FIFO
//! order: once a writer is waiting, readers that arrive after it queue
//! behind it. A stream of readers therefore cannot starve a writer.
//!
//! Recent accesses are recorded as [`AccessEvent`] intervals so tests can
//! check that write windows never overlap any other window.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RwLockConfig;
use crate::delay::{cancelled_any, sleep_or_cancel};
use crate::error::{CoordError, CoordResult};
use crate::history::History;

const COMPONENT: &str = "rwlock";

/// Kind of access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// One completed access window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessEvent {
    pub kind: AccessKind,
    /// Value read, or value written
    pub value: String,
    /// Lock acquired
    pub started: Instant,
    /// About to release the lock
    pub finished: Instant,
}

impl AccessEvent {
    /// Do the two windows share any instant?
    pub fn overlaps(&self, other: &AccessEvent) -> bool {
        self.started < other.finished && other.started < self.finished
    }
}

/// Shared string cell with reader/writer exclusion
pub struct SharedRecord {
    value: RwLock<String>,
    hold: Duration,
    events: Mutex<History<AccessEvent>>,
    cancel: CancellationToken,
}

impl SharedRecord {
    /// Create a record holding `initial`; each access keeps the lock for `hold`
    pub fn new(initial: impl Into<String>, hold: Duration) -> Self {
        let initial = initial.into();
        debug!(%initial, ?hold, "SharedRecord::new: called");
        Self {
            value: RwLock::new(initial),
            hold,
            events: Mutex::new(History::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &RwLockConfig) -> Self {
        Self::new(config.initial_value.clone(), config.hold())
    }

    /// Keep only the most recent `limit` access windows
    pub fn with_history_limit(self, limit: usize) -> Self {
        *self.lock_events() = History::new(limit);
        self
    }

    /// Read the current value under a shared hold
    pub async fn read(&self) -> CoordResult<String> {
        self.read_with_cancel(&CancellationToken::new()).await
    }

    pub async fn read_with_cancel(&self, cancel: &CancellationToken) -> CoordResult<String> {
        debug!("SharedRecord::read: called");
        let guard = tokio::select! {
            guard = self.value.read() => guard,
            _ = cancelled_any(&self.cancel, cancel) => {
                warn!("Read cancelled while waiting for lock");
                return Err(CoordError::Cancelled(COMPONENT));
            }
        };
        let started = Instant::now();

        if !self.hold.is_zero() {
            sleep_or_cancel(self.hold, &self.cancel, cancel, COMPONENT).await?;
        }

        let value = guard.clone();
        info!(%value, "Reading data");
        self.record(AccessKind::Read, value.clone(), started);
        drop(guard);
        Ok(value)
    }

    /// Replace the value under an exclusive hold
    pub async fn write(&self, new_value: impl Into<String>) -> CoordResult<()> {
        self.write_with_cancel(new_value, &CancellationToken::new()).await
    }

    /// Replace the value; a cancelled write leaves the old value in place
    pub async fn write_with_cancel(&self, new_value: impl Into<String>, cancel: &CancellationToken) -> CoordResult<()> {
        let new_value = new_value.into();
        debug!(%new_value, "SharedRecord::write: called");
        let mut guard = tokio::select! {
            guard = self.value.write() => guard,
            _ = cancelled_any(&self.cancel, cancel) => {
                warn!(%new_value, "Write cancelled while waiting for lock");
                return Err(CoordError::Cancelled(COMPONENT));
            }
        };
        let started = Instant::now();

        if !self.hold.is_zero() {
            sleep_or_cancel(self.hold, &self.cancel, cancel, COMPONENT).await?;
        }

        info!(%new_value, "Writing data");
        *guard = new_value.clone();
        self.record(AccessKind::Write, new_value, started);
        drop(guard);
        Ok(())
    }

    /// Recent access windows in completion order
    pub fn events(&self) -> Vec<AccessEvent> {
        self.lock_events().to_vec()
    }

    /// Cancel every waiting and in-progress access
    pub fn shutdown(&self) {
        debug!("SharedRecord::shutdown: called");
        self.cancel.cancel();
    }

    fn record(&self, kind: AccessKind, value: String, started: Instant) {
        self.lock_events().push(AccessEvent {
            kind,
            value,
            started,
            finished: Instant::now(),
        });
    }

    fn lock_events(&self) -> MutexGuard<'_, History<AccessEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
