//! Simulated work and cancellable waits
//!
//! Every component owns a root token (cancelled on shutdown) and most
//! operations also accept a caller token; a wait ends when either fires.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{CoordError, CoordResult};

/// Pick a random duration in `[0, max]`
pub fn random_delay(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

/// Resolve once either token is cancelled
pub async fn cancelled_any(own: &CancellationToken, caller: &CancellationToken) {
    tokio::select! {
        _ = own.cancelled() => {}
        _ = caller.cancelled() => {}
    }
}

/// Sleep for `duration` unless either token fires first
pub async fn sleep_or_cancel(
    duration: Duration,
    own: &CancellationToken,
    caller: &CancellationToken,
    component: &'static str,
) -> CoordResult<()> {
    tokio::select! {
        _ = cancelled_any(own, caller) => {
            debug!(component, ?duration, "sleep_or_cancel: cancelled");
            Err(CoordError::Cancelled(component))
        }
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
