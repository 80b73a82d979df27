//! SQLite implementation of the cache store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;

use super::traits::{CacheKey, CacheStore, CachedResponse};
use crate::db::Database;
use crate::net::Headers;

/// SQLite-based cache storage implementation.
pub struct SqliteCacheStore {
  db: Arc<Database>,
}

impl SqliteCacheStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

const ENTRY_COLUMNS: &str = "status, status_text, headers, body, cached_at";

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<(u16, String, String, Vec<u8>, String)> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
  ))
}

fn decode_entry(
  (status, status_text, headers, body, cached_at): (u16, String, String, Vec<u8>, String),
) -> Result<CachedResponse> {
  let headers: Headers = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
  let cached_at = DateTime::parse_from_rfc3339(&cached_at)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", cached_at, e))?;

  Ok(CachedResponse {
    status,
    status_text,
    headers,
    body,
    cached_at,
  })
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
  async fn ensure_partition(&self, name: &str) -> Result<()> {
    self
      .db
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache partition {}: {}", name, e))?;
    Ok(())
  }

  async fn partition_names(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_partitions ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache partition name: {}", e))?;

    Ok(names)
  }

  async fn delete_partition(&self, name: &str) -> Result<bool> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE partition = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;

    let removed = tx
      .execute("DELETE FROM cache_partitions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache partition {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  async fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<CachedResponse>> {
    let raw = {
      let conn = self.db.conn()?;
      conn
        .query_row(
          &format!(
            "SELECT {} FROM cache_entries WHERE partition = ? AND key_hash = ?",
            ENTRY_COLUMNS
          ),
          params![partition, key.cache_hash()],
          entry_from_row,
        )
        .optional()
        .map_err(|e| eyre!("Failed to read cache entry {}: {}", key.url(), e))?
    };

    raw.map(decode_entry).transpose()
  }

  async fn put(&self, partition: &str, key: &CacheKey, entry: &CachedResponse) -> Result<()> {
    let headers = serde_json::to_string(&entry.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
      params![partition],
    )
    .map_err(|e| eyre!("Failed to open cache partition {}: {}", partition, e))?;

    // Last writer wins: a concurrent put for the same key simply replaces this row
    tx.execute(
      "INSERT OR REPLACE INTO cache_entries
         (partition, key_hash, method, url, status, status_text, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        partition,
        key.cache_hash(),
        key.method(),
        key.url(),
        entry.status,
        entry.status_text,
        headers,
        entry.body,
        entry.cached_at.to_rfc3339(),
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry {}: {}", key.url(), e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  async fn match_any(&self, key: &CacheKey) -> Result<Option<CachedResponse>> {
    let raw = {
      let conn = self.db.conn()?;
      conn
        .query_row(
          &format!(
            "SELECT {} FROM cache_entries WHERE key_hash = ?
             ORDER BY partition LIMIT 1",
            ENTRY_COLUMNS
          ),
          params![key.cache_hash()],
          entry_from_row,
        )
        .optional()
        .map_err(|e| eyre!("Failed to match cache entry {}: {}", key.url(), e))?
    };

    raw.map(decode_entry).transpose()
  }
}
