//! ActiveObjectExecutor - asynchronous method invocation
//!
//! Every `invoke` becomes its own tracked tokio task bound to a fresh
//! [`Handle`]. Invocations share nothing but the executor's shutdown token.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::ActiveConfig;
use crate::delay::sleep_or_cancel;
use crate::error::{CoordError, CoordResult};
use crate::handle::{self, Handle};

const COMPONENT: &str = "active";

/// Dispatches each call onto its own unit of work
pub struct ActiveObjectExecutor {
    task_duration: Duration,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl ActiveObjectExecutor {
    pub fn new(task_duration: Duration) -> Self {
        debug!(?task_duration, "ActiveObjectExecutor::new: called");
        Self {
            task_duration,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn from_config(config: &ActiveConfig) -> Self {
        Self::new(config.task_duration())
    }

    /// Start the simulated task `name`; returns before it runs
    ///
    /// The handle resolves to "Task {name} completed" after the configured
    /// task duration.
    pub fn invoke(&self, name: &str) -> CoordResult<Handle<String>> {
        let duration = self.task_duration;
        let cancel = self.cancel.clone();
        let done = format!("Task {name} completed");
        self.invoke_with(name, async move {
            sleep_or_cancel(duration, &cancel, &CancellationToken::new(), COMPONENT).await?;
            Ok::<_, CoordError>(done)
        })
    }

    /// Start arbitrary work under `name`; returns before it runs
    pub fn invoke_with<T, Fut>(&self, name: &str, work: Fut) -> CoordResult<Handle<T>>
    where
        T: Clone + Send + Sync + 'static,
        Fut: Future<Output = CoordResult<T>> + Send + 'static,
    {
        debug!(%name, "ActiveObjectExecutor::invoke: called");
        if self.cancel.is_cancelled() {
            return Err(CoordError::Closed(COMPONENT));
        }

        let (completer, handle) = handle::channel(name);
        let cancel = self.cancel.clone();
        let name = name.to_string();
        self.tracker.spawn(async move {
            let outcome = tokio::select! {
                outcome = work => outcome,
                _ = cancel.cancelled() => Err(CoordError::Cancelled(COMPONENT)),
            };
            let settled = match outcome {
                Ok(value) => {
                    info!(%name, "Task completed");
                    completer.complete(value)
                }
                Err(e) => {
                    warn!(%name, error = %e, "Task failed");
                    completer.fail(e)
                }
            };
            if let Err(e) = settled {
                warn!(%name, error = %e, "Task could not settle its handle");
            }
        });
        Ok(handle)
    }

    /// Wait for an invoked task and return its value or failure
    pub async fn resolve<T: Clone>(handle: &Handle<T>) -> CoordResult<T> {
        debug!(label = handle.label(), "ActiveObjectExecutor::resolve: called");
        handle.wait().await
    }

    /// Invocations still running
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel every running invocation; their handles fail with `Cancelled`
    pub async fn shutdown(&self) {
        debug!("ActiveObjectExecutor::shutdown: called");
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
