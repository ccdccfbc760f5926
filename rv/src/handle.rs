//! Handle - write-once result cell
//!
//! A [`Completer`] settles the cell exactly once; any number of [`Handle`]
//! clones observe it. The pair is backed by a `watch` channel, so waiting on
//! a handle suspends the task instead of occupying a thread.
//!
//! A completer that is dropped without settling fails its handle, so a
//! handle can never stay pending after the work behind it is gone (panic,
//! abort, runtime shutdown).

use tokio::sync::watch;
use tracing::{debug, error};

use crate::error::{CoordError, CoordResult};

/// Observable state of a handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleState<T> {
    /// Not settled yet (the only non-terminal state)
    Pending,

    /// Settled with a value
    Completed(T),

    /// Settled with a failure
    Failed(CoordError),
}

impl<T> HandleState<T> {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(&self) -> bool {
        !matches!(self, HandleState::Pending)
    }

    /// Convert a terminal state into a result
    ///
    /// Returns None while pending.
    pub fn into_result(self) -> Option<CoordResult<T>> {
        match self {
            HandleState::Pending => None,
            HandleState::Completed(value) => Some(Ok(value)),
            HandleState::Failed(err) => Some(Err(err)),
        }
    }
}

/// Create a connected completer/handle pair
pub fn channel<T>(label: impl Into<String>) -> (Completer<T>, Handle<T>) {
    let label = label.into();
    let (tx, rx) = watch::channel(HandleState::Pending);
    (
        Completer {
            tx,
            label: label.clone(),
        },
        Handle { rx, label },
    )
}

/// Read side of the cell
#[derive(Debug, Clone)]
pub struct Handle<T> {
    rx: watch::Receiver<HandleState<T>>,
    label: String,
}

impl<T: Clone> Handle<T> {
    /// Label given when the pair was created
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Snapshot of the current state
    pub fn state(&self) -> HandleState<T> {
        self.rx.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        !self.rx.borrow().is_terminal()
    }

    /// The result if settled, without waiting
    pub fn try_result(&self) -> Option<CoordResult<T>> {
        self.state().into_result()
    }

    /// Wait until the handle reaches a terminal state
    pub async fn wait(&self) -> CoordResult<T> {
        debug!(label = %self.label, "Handle::wait: called");
        let mut rx = self.rx.clone();
        let settled = match rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => state.clone(),
            // Completer::drop settles before the sender goes away, so this
            // only happens if the sender was leaked in an unsettled state
            Err(_) => HandleState::Failed(CoordError::ComputationFailure(format!(
                "{} abandoned before completion",
                self.label
            ))),
        };
        match settled.into_result() {
            Some(result) => result,
            None => Err(CoordError::InvariantViolation(format!(
                "{} observed pending after wait",
                self.label
            ))),
        }
    }
}

/// Write side of the cell
#[derive(Debug)]
pub struct Completer<T> {
    tx: watch::Sender<HandleState<T>>,
    label: String,
}

impl<T> Completer<T> {
    /// Settle with a value
    pub fn complete(self, value: T) -> CoordResult<()> {
        self.settle(HandleState::Completed(value))
    }

    /// Settle with a failure
    pub fn fail(self, err: CoordError) -> CoordResult<()> {
        self.settle(HandleState::Failed(err))
    }

    /// Pending -> terminal, exactly once
    pub(crate) fn settle(&self, next: HandleState<T>) -> CoordResult<()> {
        if !next.is_terminal() {
            return Err(CoordError::InvariantViolation(format!(
                "{} cannot be settled back to pending",
                self.label
            )));
        }

        let settled = self.tx.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = next;
            true
        });

        if settled {
            debug!(label = %self.label, "Completer::settle: settled");
            Ok(())
        } else {
            error!(label = %self.label, "Completer::settle: already terminal");
            Err(CoordError::InvariantViolation(format!("{} settled twice", self.label)))
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        let label = &self.label;
        let abandoned = self.tx.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = HandleState::Failed(CoordError::ComputationFailure(format!(
                "{label} abandoned before completion"
            )));
            true
        });
        if abandoned {
            debug!(%label, "Completer::drop: failed unsettled handle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_complete_resolves_waiters() {
        let (completer, handle) = channel::<String>("task-a");
        let other = handle.clone();

        assert!(handle.is_pending());
        assert_eq!(handle.state(), HandleState::Pending);

        completer.complete("done".to_string()).unwrap();

        assert_eq!(handle.wait().await, Ok("done".to_string()));
        assert_eq!(other.wait().await, Ok("done".to_string()));
        assert!(!handle.is_pending());
    }

    #[tokio::test]
    async fn test_fail_resolves_waiters() {
        let (completer, handle) = channel::<String>("task-b");
        completer.fail(CoordError::Cancelled("active")).unwrap();

        assert_eq!(handle.wait().await, Err(CoordError::Cancelled("active")));
        assert_eq!(handle.try_result(), Some(Err(CoordError::Cancelled("active"))));
    }

    #[tokio::test]
    async fn test_second_settle_is_invariant_violation() {
        let (completer, handle) = channel::<u32>("task-c");
        completer.settle(HandleState::Completed(1)).unwrap();

        let err = completer.settle(HandleState::Completed(2)).unwrap_err();
        assert!(matches!(err, CoordError::InvariantViolation(_)));

        // First value wins
        assert_eq!(handle.wait().await, Ok(1));
    }

    #[tokio::test]
    async fn test_settle_to_pending_rejected() {
        let (completer, handle) = channel::<u32>("task-d");
        let err = completer.settle(HandleState::Pending).unwrap_err();
        assert!(matches!(err, CoordError::InvariantViolation(_)));
        assert!(handle.is_pending());
    }

    #[tokio::test]
    async fn test_dropped_completer_fails_handle() {
        let (completer, handle) = channel::<String>("task-e");
        drop(completer);

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, CoordError::ComputationFailure(msg) if msg.contains("abandoned")));
    }

    #[tokio::test]
    async fn test_aborted_task_fails_handle() {
        let (completer, handle) = channel::<String>("task-f");
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            let _ = completer.complete("never".to_string());
        });
        task.abort();

        let result = tokio::time::timeout(Duration::from_secs(5), handle.wait()).await;
        assert!(matches!(result, Ok(Err(CoordError::ComputationFailure(_)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_suspends_until_settled() {
        let (completer, handle) = channel::<String>("task-g");

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            completer.complete("late".to_string()).unwrap();
        });

        let start = tokio::time::Instant::now();
        assert_eq!(handle.wait().await, Ok("late".to_string()));
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
