use async_trait::async_trait;
use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

use super::storage::QueueStore;
use super::types::{DrainReport, SyncKind, SyncTask};
use crate::net::{Network, Request};

/// Platform deferred-retry registration.
///
/// Registering a tag asks the platform to wake the worker with a sync signal
/// for that tag once connectivity returns.
#[async_trait]
pub trait SyncScheduler: Send + Sync {
  async fn register(&self, tag: &str) -> Result<()>;
}

/// Durable FIFO of pending mutations.
///
/// Cheap to clone; clones share the store and the drain guard.
#[derive(Clone)]
pub struct SyncQueue {
  store: Arc<dyn QueueStore>,
  network: Arc<dyn Network>,
  scheduler: Option<Arc<dyn SyncScheduler>>,
  /// Origin the endpoint table's paths resolve against
  origin: Url,
  /// Serializes drains so concurrent triggers never replay a task twice.
  /// Holds ids that replayed successfully but could not be removed yet.
  draining: Arc<Mutex<HashSet<String>>>,
}

impl SyncQueue {
  pub fn new(store: Arc<dyn QueueStore>, network: Arc<dyn Network>, origin: Url) -> Self {
    Self {
      store,
      network,
      scheduler: None,
      origin,
      draining: Arc::new(Mutex::new(HashSet::new())),
    }
  }

  /// Register deferred retries with the platform on every enqueue.
  pub fn with_scheduler(mut self, scheduler: Arc<dyn SyncScheduler>) -> Self {
    self.scheduler = Some(scheduler);
    self
  }

  /// Persist a new task and request a deferred retry for it.
  ///
  /// A failed retry registration is logged; the task stays queued and will
  /// drain on the next explicit trigger.
  pub async fn enqueue(&self, kind: SyncKind, payload: serde_json::Value) -> Result<String> {
    let task = SyncTask {
      id: format!("{}-{}", kind, uuid::Uuid::new_v4()),
      kind,
      payload,
      enqueued_at: Utc::now(),
      attempts: 0,
    };

    self.store.push(&task).await?;
    info!(task = %task.id, kind = %kind, "Queued for sync");

    if let Some(scheduler) = &self.scheduler {
      let tag = kind.sync_tag();
      match scheduler.register(&tag).await {
        Ok(()) => debug!(tag = %tag, "Background sync registered"),
        Err(e) => error!(tag = %tag, "Background sync registration failed: {}", e),
      }
    }

    Ok(task.id)
  }

  /// Pending tasks in FIFO order.
  pub async fn pending(&self) -> Result<Vec<SyncTask>> {
    self.store.list().await
  }

  pub async fn len(&self) -> Result<usize> {
    self.store.len().await
  }

  pub async fn is_empty(&self) -> Result<bool> {
    Ok(self.len().await? == 0)
  }

  /// Attempt every queued task once, in enqueue order.
  ///
  /// A task is removed only when its replay gets a 2xx response. A failing
  /// task stays queued and does not stop later tasks from being attempted.
  /// Store errors on one task are logged and never end the cycle; a task
  /// that synced but could not be removed is not replayed again.
  pub async fn drain(&self) -> Result<DrainReport> {
    let mut synced = self.draining.lock().await;

    let tasks = self.store.list().await?;
    let mut report = DrainReport::default();

    if tasks.is_empty() {
      return Ok(report);
    }

    info!(count = tasks.len(), "Processing sync queue");

    for task in tasks {
      if synced.contains(&task.id) {
        // Already delivered; only the removal is outstanding
        match self.store.remove(&task.id).await {
          Ok(_) => {
            synced.remove(&task.id);
            debug!(task = %task.id, "Removed previously synced item");
          }
          Err(e) => warn!(task = %task.id, "Synced item still not removed: {}", e),
        }
        continue;
      }

      if let Err(e) = self.store.record_attempt(&task.id).await {
        warn!(task = %task.id, "Failed to record sync attempt: {}", e);
      }

      match self.replay(&task).await {
        Ok(()) => {
          if let Err(e) = self.store.remove(&task.id).await {
            error!(task = %task.id, "Synced item could not be removed: {}", e);
            synced.insert(task.id.clone());
          }
          info!(task = %task.id, "Synced item");
          report.succeeded.push(task.id);
        }
        Err(e) => {
          warn!(task = %task.id, attempts = task.attempts + 1, "Failed to sync item: {}", e);
          report.failed.push(task.id);
        }
      }
    }

    Ok(report)
  }

  /// Issue the mutation for one task.
  async fn replay(&self, task: &SyncTask) -> Result<()> {
    let endpoint = task.kind.endpoint();
    let url = self
      .origin
      .join(endpoint.path)
      .map_err(|e| eyre!("Failed to build endpoint URL for {}: {}", task.kind, e))?;

    let request = Request::json(endpoint.method, url, &task.payload)?;
    let response = self.network.fetch(&request).await?;

    if !response.is_ok() {
      return Err(eyre!(
        "Sync failed: {} {}",
        response.status,
        response.status_text
      ));
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::net::Response;
  use crate::sync::SqliteQueueStore;
  use crate::testing::{FakeNetwork, FakeScheduler};
  use reqwest::Method;
  use serde_json::json;

  fn queue(network: Arc<FakeNetwork>) -> SyncQueue {
    let store = Arc::new(SqliteQueueStore::new(Arc::new(
      Database::open_in_memory().unwrap(),
    )));
    SyncQueue::new(store, network, Url::parse("https://dot.example/").unwrap())
  }

  #[tokio::test]
  async fn test_settings_update_scenario() {
    let network = Arc::new(FakeNetwork::new());
    network.set_online(false);
    let queue = queue(network.clone());

    let id = queue
      .enqueue(SyncKind::SettingsUpdate, json!({"theme": "dark"}))
      .await
      .unwrap();
    assert_eq!(queue.len().await.unwrap(), 1);

    network.set_online(true);
    network.respond(
      Method::PUT,
      "https://dot.example/api/user/settings",
      Response::new(200, "{}"),
    );

    let report = queue.drain().await.unwrap();
    assert_eq!(report.succeeded, vec![id]);
    assert!(report.failed.is_empty());
    assert!(queue.is_empty().await.unwrap());

    let calls = network.requests();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, Method::PUT);
    assert_eq!(calls[0].url.path(), "/api/user/settings");
    let body: serde_json::Value = serde_json::from_slice(calls[0].body.as_deref().unwrap()).unwrap();
    assert_eq!(body, json!({"theme": "dark"}));
  }

  #[tokio::test]
  async fn test_drain_all_succeed() {
    let network = Arc::new(FakeNetwork::new());
    network.respond(
      Method::POST,
      "https://dot.example/api/comments",
      Response::new(201, "{}"),
    );
    let queue = queue(network.clone());

    let mut ids = Vec::new();
    for n in 0..5 {
      ids.push(
        queue
          .enqueue(SyncKind::CommentCreate, json!({"n": n}))
          .await
          .unwrap(),
      );
    }

    let report = queue.drain().await.unwrap();
    assert_eq!(report.succeeded, ids);
    assert!(queue.is_empty().await.unwrap());
  }

  #[tokio::test]
  async fn test_failing_task_does_not_block_others() {
    let network = Arc::new(FakeNetwork::new());
    network.respond(
      Method::POST,
      "https://dot.example/api/blog/posts",
      Response::new(200, "{}"),
    );
    network.respond(
      Method::POST,
      "https://dot.example/api/integrations",
      Response::new(500, "boom"),
    );
    let queue = queue(network.clone());

    let first = queue.enqueue(SyncKind::ContentCreate, json!({})).await.unwrap();
    let failing = queue
      .enqueue(SyncKind::IntegrationWrite, json!({}))
      .await
      .unwrap();
    let last = queue.enqueue(SyncKind::ContentCreate, json!({})).await.unwrap();

    let report = queue.drain().await.unwrap();
    assert_eq!(report.succeeded, vec![first, last]);
    assert_eq!(report.failed, vec![failing.clone()]);

    let pending = queue.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, failing);
    assert_eq!(pending[0].attempts, 1);

    // Still eligible next time, one more attempt per drain
    let report = queue.drain().await.unwrap();
    assert_eq!(report.failed, vec![failing]);
    assert_eq!(queue.pending().await.unwrap()[0].attempts, 2);
  }

  #[tokio::test]
  async fn test_offline_drain_keeps_everything() {
    let network = Arc::new(FakeNetwork::new());
    network.set_online(false);
    let queue = queue(network.clone());

    queue.enqueue(SyncKind::CommentCreate, json!({})).await.unwrap();
    queue.enqueue(SyncKind::SettingsUpdate, json!({})).await.unwrap();

    let report = queue.drain().await.unwrap();
    assert!(report.succeeded.is_empty());
    assert_eq!(report.failed.len(), 2);
    assert_eq!(queue.len().await.unwrap(), 2);
  }

  #[tokio::test]
  async fn test_concurrent_drains_replay_once() {
    let network = Arc::new(FakeNetwork::new());
    network.respond(
      Method::POST,
      "https://dot.example/api/comments",
      Response::new(200, "{}"),
    );
    let queue = queue(network.clone());
    let id = queue.enqueue(SyncKind::CommentCreate, json!({})).await.unwrap();

    let (a, b) = tokio::join!(queue.drain(), queue.drain());
    let mut succeeded = a.unwrap().succeeded;
    succeeded.extend(b.unwrap().succeeded);

    assert_eq!(succeeded, vec![id]);
    assert_eq!(network.requests().len(), 1);
  }

  #[tokio::test]
  async fn test_enqueue_registers_deferred_retry() {
    let network = Arc::new(FakeNetwork::new());
    let scheduler = Arc::new(FakeScheduler::default());
    let queue = queue(network).with_scheduler(scheduler.clone());

    let a = queue.enqueue(SyncKind::ContentCreate, json!({})).await.unwrap();
    let b = queue.enqueue(SyncKind::ContentCreate, json!({})).await.unwrap();

    assert_ne!(a, b);
    assert!(a.starts_with("content-create-"));
    assert_eq!(
      scheduler.tags(),
      vec!["content-create-sync", "content-create-sync"]
    );
  }

  #[tokio::test]
  async fn test_registration_failure_is_not_fatal() {
    let network = Arc::new(FakeNetwork::new());
    let scheduler = Arc::new(FakeScheduler::failing());
    let queue = queue(network).with_scheduler(scheduler);

    queue.enqueue(SyncKind::CommentCreate, json!({})).await.unwrap();
    assert_eq!(queue.len().await.unwrap(), 1);
  }

  /// Store whose `remove` fails a set number of times.
  struct FlakyRemoveStore {
    inner: SqliteQueueStore,
    remove_failures: std::sync::atomic::AtomicUsize,
  }

  #[async_trait]
  impl QueueStore for FlakyRemoveStore {
    async fn push(&self, task: &SyncTask) -> Result<()> {
      self.inner.push(task).await
    }

    async fn list(&self) -> Result<Vec<SyncTask>> {
      self.inner.list().await
    }

    async fn remove(&self, id: &str) -> Result<bool> {
      use std::sync::atomic::Ordering;
      let left = self.remove_failures.load(Ordering::SeqCst);
      if left > 0 {
        self.remove_failures.store(left - 1, Ordering::SeqCst);
        return Err(eyre!("disk I/O error"));
      }
      self.inner.remove(id).await
    }

    async fn record_attempt(&self, id: &str) -> Result<()> {
      self.inner.record_attempt(id).await
    }

    async fn len(&self) -> Result<usize> {
      self.inner.len().await
    }
  }

  #[tokio::test]
  async fn test_remove_failure_neither_aborts_nor_duplicates() {
    let network = Arc::new(FakeNetwork::new());
    network.respond(
      Method::POST,
      "https://dot.example/api/comments",
      Response::new(201, "{}"),
    );
    let store = Arc::new(FlakyRemoveStore {
      inner: SqliteQueueStore::new(Arc::new(Database::open_in_memory().unwrap())),
      remove_failures: std::sync::atomic::AtomicUsize::new(1),
    });
    let queue = SyncQueue::new(
      store,
      network.clone(),
      Url::parse("https://dot.example/").unwrap(),
    );

    let a = queue.enqueue(SyncKind::CommentCreate, json!({"n": 1})).await.unwrap();
    let b = queue.enqueue(SyncKind::CommentCreate, json!({"n": 2})).await.unwrap();

    let report = queue.drain().await.unwrap();
    assert_eq!(report.succeeded, vec![a.clone(), b]);
    assert_eq!(network.requests().len(), 2);
    assert_eq!(queue.pending().await.unwrap()[0].id, a);

    // The leftover row is cleaned up without a second POST
    let report = queue.drain().await.unwrap();
    assert!(report.is_empty());
    assert_eq!(network.requests().len(), 2);
    assert!(queue.is_empty().await.unwrap());
  }
}
