//! Rendezvous - concurrency coordination primitives
//!
//! Seven classic coordination patterns built on tokio, each an owned
//! instance with its own shutdown token:
//!
//! - [`monitor`] - FIFO-serialized job execution
//! - [`rwlock`] - multi-reader/single-writer shared record
//! - [`barrier`] - reusable N-party rendezvous
//! - [`channel`] - blocking FIFO producer/consumer channel
//! - [`pool`] - fixed-size worker pool
//! - [`aggregator`] - batch of futures joined into one result
//! - [`active`] - active object returning handles
//!
//! Every wait is cancellable and leaves the component's state intact when
//! cancelled or dropped. [`service::PatternService`] wires one of each
//! together behind the external operations.

pub mod active;
pub mod aggregator;
pub mod barrier;
pub mod channel;
pub mod cli;
pub mod config;
pub mod delay;
pub mod domain;
pub mod error;
pub mod handle;
pub mod history;
pub mod monitor;
pub mod pool;
pub mod rwlock;
pub mod service;

// Re-export commonly used types
pub use active::ActiveObjectExecutor;
pub use aggregator::FutureAggregator;
pub use barrier::{Barrier, BarrierWaitResult, CompletionAction};
pub use channel::{BoundedChannel, PendingPut};
pub use config::Config;
pub use domain::{Job, TaskId};
pub use error::{CoordError, CoordResult};
pub use handle::{Completer, Handle, HandleState};
pub use history::{DEFAULT_HISTORY_LIMIT, History};
pub use monitor::{MonitorEvent, MonitorQueue, QueuedJob};
pub use pool::{Execution, PoolStats, WorkerPool, max_overlap};
pub use rwlock::{AccessEvent, AccessKind, SharedRecord};
pub use service::{Ack, PatternService};
