//! FutureAggregator - launch a batch of units and join their results
//!
//! Each unit runs as its own tokio task and settles a [`Handle`]. Joining
//! awaits every handle, so the joining task is suspended, not parked on a
//! thread, until the last one is terminal.

use std::time::Duration;

use futures::future;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::FuturesConfig;
use crate::delay::{random_delay, sleep_or_cancel};
use crate::error::{CoordError, CoordResult};
use crate::handle::{self, Handle};

const COMPONENT: &str = "futures";

/// Batch launcher for independent asynchronous units
pub struct FutureAggregator {
    max_delay: Duration,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl FutureAggregator {
    pub fn new(max_delay: Duration) -> Self {
        debug!(?max_delay, "FutureAggregator::new: called");
        Self {
            max_delay,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn from_config(config: &FuturesConfig) -> Self {
        Self::new(config.max_delay())
    }

    /// Launch `n` simulated units; unit `k` resolves to "Task k completed"
    pub fn launch_all(&self, n: usize) -> CoordResult<Vec<Handle<String>>> {
        let max_delay = self.max_delay;
        let cancel = self.cancel.clone();
        self.launch_all_with(n, move |k| {
            let cancel = cancel.clone();
            async move {
                let delay = random_delay(max_delay);
                sleep_or_cancel(delay, &cancel, &CancellationToken::new(), COMPONENT).await?;
                Ok::<_, CoordError>(format!("Task {k} completed"))
            }
        })
    }

    /// Launch `n` units running `work(k)` for k in 1..=n
    ///
    /// Handles are returned in launch order. A unit stopped by `shutdown`
    /// fails its handle with `Cancelled`.
    pub fn launch_all_with<T, F, Fut>(&self, n: usize, work: F) -> CoordResult<Vec<Handle<T>>>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(usize) -> Fut,
        Fut: Future<Output = CoordResult<T>> + Send + 'static,
    {
        debug!(n, "FutureAggregator::launch_all: called");
        if self.cancel.is_cancelled() {
            return Err(CoordError::Closed(COMPONENT));
        }

        let mut handles = Vec::with_capacity(n);
        for k in 1..=n {
            let (completer, handle) = handle::channel(format!("task-{k}"));
            let unit = work(k);
            let cancel = self.cancel.clone();
            self.tracker.spawn(async move {
                let outcome = tokio::select! {
                    outcome = unit => outcome,
                    _ = cancel.cancelled() => Err(CoordError::Cancelled(COMPONENT)),
                };
                let settled = match outcome {
                    Ok(value) => completer.complete(value),
                    Err(e) => {
                        warn!(task = k, error = %e, "Future unit failed");
                        completer.fail(e)
                    }
                };
                if let Err(e) = settled {
                    warn!(task = k, error = %e, "Future unit could not settle its handle");
                }
            });
            handles.push(handle);
        }
        Ok(handles)
    }

    /// Wait until every handle is terminal; values come back in launch order
    ///
    /// If any unit failed, the join fails with the first failure in launch
    /// order and no values are returned.
    pub async fn join_all<T: Clone>(handles: &[Handle<T>]) -> CoordResult<Vec<T>> {
        debug!(count = handles.len(), "FutureAggregator::join_all: called");
        let outcomes = future::join_all(handles.iter().map(Handle::wait)).await;

        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        if failed > 0 {
            warn!(count = outcomes.len(), failed, "Future batch finished with failures");
        }
        let values = outcomes.into_iter().collect::<CoordResult<Vec<T>>>()?;
        info!(count = values.len(), "All future units completed");
        Ok(values)
    }

    /// Join values the way the batch result reports them
    pub fn combine(values: &[String]) -> String {
        values.join(", ")
    }

    /// Launch `n` simulated units, join them and combine the values
    pub async fn run_batch(&self, n: usize) -> CoordResult<String> {
        let handles = self.launch_all(n)?;
        let values = Self::join_all(&handles).await?;
        Ok(Self::combine(&values))
    }

    /// Cancel every running unit; later launches are rejected
    pub async fn shutdown(&self) {
        debug!("FutureAggregator::shutdown: called");
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
