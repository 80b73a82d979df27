//! The background worker.
//!
//! The worker owns no memory shared with the page. It runs as its own tokio
//! task and is reached only through [`WorkerHandle`] messages:
//! - install pre-caches the static partition and activates immediately
//! - activate retires cache partitions from other builds
//! - fetch applies the per-class caching policy of [`RequestRouter`]
//! - sync drains the mutation queue
//! - push and notification clicks drive local notifications

mod actor;
mod context;
mod router;

pub use actor::{spawn, WorkerHandle, WorkerMessage};
pub use context::{ClientAction, ServiceWorker, WorkerState, DEFAULT_PUSH_BODY, PUSH_TAG};
pub use router::{
  classify, offline_response, PassThrough, RequestClass, RequestRouter, RouteOutcome,
  OFFLINE_ERROR, OFFLINE_MESSAGE,
};
