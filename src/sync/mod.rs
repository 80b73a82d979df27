//! Durable queue of mutations that failed for lack of connectivity.
//!
//! The page enqueues; the worker drains when connectivity comes back, either
//! because the page noticed the reconnect or because the platform fired the
//! deferred-retry signal registered at enqueue time.

mod queue;
mod storage;
mod types;

pub use queue::{SyncQueue, SyncScheduler};
pub use storage::{QueueStore, SqliteQueueStore};
pub use types::{DrainReport, SyncEndpoint, SyncKind, SyncTask};
