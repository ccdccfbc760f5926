//! Coordination error types

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the coordination components
///
/// Cloneable so a single failure can be stored in a [`crate::handle::Handle`]
/// and observed by every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordError {
    #[error("Cancelled while waiting in {0}")]
    Cancelled(&'static str),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Computation failed: {0}")]
    ComputationFailure(String),

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Backlog full ({0} tasks queued)")]
    BacklogFull(usize),

    #[error("{0} is shut down")]
    Closed(&'static str),

    #[error("{0} is already running")]
    AlreadyRunning(&'static str),
}

/// Result alias for coordination operations
pub type CoordResult<T> = Result<T, CoordError>;

impl CoordError {
    /// Check if this is a cancellation of a blocking wait
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CoordError::Cancelled(_))
    }

    /// Check if the caller can recover from this error
    ///
    /// Everything except an invariant violation is an external condition.
    pub fn is_recoverable(&self) -> bool {
        match self {
            CoordError::Cancelled(_) => true,
            CoordError::Timeout(_) => true,
            CoordError::ComputationFailure(_) => true,
            CoordError::BacklogFull(_) => true,
            CoordError::Closed(_) => true,
            CoordError::AlreadyRunning(_) => true,
            CoordError::InvariantViolation(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_cancellation() {
        assert!(CoordError::Cancelled("monitor").is_cancellation());
        assert!(!CoordError::Timeout(Duration::from_secs(1)).is_cancellation());
        assert!(!CoordError::ComputationFailure("boom".to_string()).is_cancellation());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(CoordError::Cancelled("barrier").is_recoverable());
        assert!(CoordError::ComputationFailure("boom".to_string()).is_recoverable());
        assert!(CoordError::BacklogFull(10).is_recoverable());

        // Invariant violations signal a bug, not an external condition
        assert!(!CoordError::InvariantViolation("double settle".to_string()).is_recoverable());
    }

    #[test]
    fn test_display_names_component() {
        let err = CoordError::Cancelled("monitor");
        assert_eq!(err.to_string(), "Cancelled while waiting in monitor");

        let err = CoordError::Closed("pool");
        assert_eq!(err.to_string(), "pool is shut down");
    }
}
