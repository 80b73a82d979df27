//! Versioned response cache for the offline worker.
//!
//! This module provides the platform-owned cache the worker reads and writes:
//! - Responses are keyed by (method, normalized URL)
//! - Entries live in named partitions tagged with a build version
//! - Partitions from older builds are dropped wholesale on activate
//! - No per-entry eviction; a partition grows until its build is retired
//!
//! Concurrent writes to the same key are not sequenced. The last `put` wins,
//! which is acceptable because every entry is a snapshot of the same URL.

mod storage;
mod traits;

pub use storage::SqliteCacheStore;
pub use traits::{CacheKey, CacheStore, CachedResponse, Partition, PartitionNames};
