//! Durable storage for queued sync tasks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use std::sync::Arc;

use super::types::{SyncKind, SyncTask};
use crate::db::Database;

/// Trait for queue storage backends.
///
/// Storage lives outside page memory so tasks survive reloads.
#[async_trait]
pub trait QueueStore: Send + Sync {
  /// Append a task at the tail.
  async fn push(&self, task: &SyncTask) -> Result<()>;

  /// All tasks in enqueue order.
  async fn list(&self) -> Result<Vec<SyncTask>>;

  /// Remove a task. Returns whether it was present.
  async fn remove(&self, id: &str) -> Result<bool>;

  /// Increment a task's attempt counter.
  async fn record_attempt(&self, id: &str) -> Result<()>;

  async fn len(&self) -> Result<usize>;
}

/// SQLite-based queue storage.
pub struct SqliteQueueStore {
  db: Arc<Database>,
}

impl SqliteQueueStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
  async fn push(&self, task: &SyncTask) -> Result<()> {
    let payload = serde_json::to_string(&task.payload)
      .map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    self
      .db
      .conn()?
      .execute(
        "INSERT INTO sync_tasks (id, kind, payload, enqueued_at, attempts)
         VALUES (?, ?, ?, ?, ?)",
        params![
          task.id,
          task.kind.as_str(),
          payload,
          task.enqueued_at.to_rfc3339(),
          task.attempts
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue task {}: {}", task.id, e))?;

    Ok(())
  }

  async fn list(&self) -> Result<Vec<SyncTask>> {
    let rows: Vec<(String, String, String, String, u32)> = {
      let conn = self.db.conn()?;
      let mut stmt = conn
        .prepare(
          "SELECT id, kind, payload, enqueued_at, attempts FROM sync_tasks ORDER BY seq",
        )
        .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

      let rows = stmt
        .query_map([], |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
          ))
        })
        .map_err(|e| eyre!("Failed to query sync tasks: {}", e))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| eyre!("Failed to read sync task: {}", e))?;
      rows
    };

    rows
      .into_iter()
      .map(|(id, kind, payload, enqueued_at, attempts)| -> Result<SyncTask> {
        let kind: SyncKind = kind
          .parse()
          .map_err(|e| eyre!("Corrupt sync task {}: {}", id, e))?;
        let payload = serde_json::from_str(&payload)
          .map_err(|e| eyre!("Failed to deserialize payload of {}: {}", id, e))?;
        let enqueued_at = DateTime::parse_from_rfc3339(&enqueued_at)
          .map(|dt| dt.with_timezone(&Utc))
          .map_err(|e| eyre!("Failed to parse datetime '{}': {}", enqueued_at, e))?;

        Ok(SyncTask {
          id,
          kind,
          payload,
          enqueued_at,
          attempts,
        })
      })
      .collect()
  }

  async fn remove(&self, id: &str) -> Result<bool> {
    let removed = self
      .db
      .conn()?
      .execute("DELETE FROM sync_tasks WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove task {}: {}", id, e))?;
    Ok(removed > 0)
  }

  async fn record_attempt(&self, id: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "UPDATE sync_tasks SET attempts = attempts + 1 WHERE id = ?",
        params![id],
      )
      .map_err(|e| eyre!("Failed to record attempt for {}: {}", id, e))?;
    Ok(())
  }

  async fn len(&self) -> Result<usize> {
    let count: i64 = self
      .db
      .conn()?
      .query_row("SELECT COUNT(*) FROM sync_tasks", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count sync tasks: {}", e))?;
    Ok(count as usize)
  }
}
