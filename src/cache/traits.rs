//! Core traits and types for the response cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;
use url::Url;

use crate::net::{Headers, Request, Response, ResponseSource};

/// Composite cache key: request method plus normalized URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  method: String,
  url: String,
}

impl CacheKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    Self {
      method: method.as_str().to_uppercase(),
      url: normalize_url(url),
    }
  }

  pub fn for_request(request: &Request) -> Self {
    Self::new(&request.method, &request.url)
  }

  /// Key for a GET of the given URL.
  pub fn get(url: &Url) -> Self {
    Self::new(&Method::GET, url)
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// SHA256 hash for stable, fixed-length storage keys
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// Fragments never reach the server, so they never distinguish entries.
fn normalize_url(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.to_string()
}

/// A stored response snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
  pub status: u16,
  pub status_text: String,
  pub headers: Headers,
  pub body: Vec<u8>,
  /// When the snapshot was written
  pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
  /// Snapshot a live response.
  pub fn from_response(response: &Response) -> Self {
    Self {
      status: response.status,
      status_text: response.status_text.clone(),
      headers: response.headers.clone(),
      body: response.body.clone(),
      cached_at: Utc::now(),
    }
  }

  /// Rehydrate into a response marked as served from cache.
  pub fn into_response(self) -> Response {
    Response {
      status: self.status,
      status_text: self.status_text,
      headers: self.headers,
      body: self.body,
      redirected: false,
      source: ResponseSource::Cache,
    }
  }
}

/// Names of the two partitions owned by one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
  /// Build-time assets (pre-cache manifest, scripts, styles, images)
  pub static_name: String,
  /// Runtime-fetched documents and API responses
  pub dynamic_name: String,
}

impl PartitionNames {
  pub fn new(prefix: &str, build_version: &str) -> Self {
    Self {
      static_name: format!("{}-static-{}", prefix, build_version),
      dynamic_name: format!("{}-dynamic-{}", prefix, build_version),
    }
  }

  pub fn current(&self) -> BTreeSet<String> {
    [self.static_name.clone(), self.dynamic_name.clone()]
      .into_iter()
      .collect()
  }
}

/// Trait for cache storage backends.
///
/// The store is owned by the platform, not by either execution context, so
/// every operation is a suspension point.
#[async_trait]
pub trait CacheStore: Send + Sync {
  /// Create the partition if it does not exist yet.
  async fn ensure_partition(&self, name: &str) -> Result<()>;

  /// Names of every partition currently present.
  async fn partition_names(&self) -> Result<Vec<String>>;

  /// Delete a partition and all of its entries. Returns whether it existed.
  async fn delete_partition(&self, name: &str) -> Result<bool>;

  /// Look up a key in one partition.
  async fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<CachedResponse>>;

  /// Store (or overwrite) an entry, creating the partition on demand.
  async fn put(&self, partition: &str, key: &CacheKey, entry: &CachedResponse) -> Result<()>;

  /// Look up a key across all partitions.
  async fn match_any(&self, key: &CacheKey) -> Result<Option<CachedResponse>>;

  /// Delete every partition whose name is not in `current`.
  ///
  /// Partitions named in `current` are left alone even when empty. Returns
  /// the names that were deleted.
  async fn delete_stale_partitions(&self, current: &BTreeSet<String>) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.partition_names().await? {
      if current.contains(&name) {
        continue;
      }
      if self.delete_partition(&name).await? {
        info!(partition = %name, "Deleted stale cache partition");
        deleted.push(name);
      }
    }
    Ok(deleted)
  }
}

/// Handle to one named partition.
#[derive(Clone)]
pub struct Partition {
  store: Arc<dyn CacheStore>,
  name: String,
}

impl Partition {
  /// Open (creating if needed) the named partition.
  pub async fn open(store: Arc<dyn CacheStore>, name: &str) -> Result<Self> {
    store.ensure_partition(name).await?;
    Ok(Self {
      store,
      name: name.to_string(),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub async fn get(&self, key: &CacheKey) -> Result<Option<CachedResponse>> {
    self.store.get(&self.name, key).await
  }

  pub async fn put(&self, key: &CacheKey, entry: &CachedResponse) -> Result<()> {
    self.store.put(&self.name, key, entry).await
  }
}

impl std::fmt::Debug for Partition {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Partition")
      .field("name", &self.name)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_ignores_fragment() {
    let a = CacheKey::get(&Url::parse("https://dot.example/blog#top").unwrap());
    let b = CacheKey::get(&Url::parse("https://dot.example/blog").unwrap());
    assert_eq!(a, b);
    assert_eq!(a.cache_hash(), b.cache_hash());
  }

  #[test]
  fn test_key_distinguishes_method_and_query() {
    let url = Url::parse("https://dot.example/api/posts?page=1").unwrap();
    let other = Url::parse("https://dot.example/api/posts?page=2").unwrap();

    assert_ne!(
      CacheKey::get(&url).cache_hash(),
      CacheKey::new(&Method::HEAD, &url).cache_hash()
    );
    assert_ne!(CacheKey::get(&url), CacheKey::get(&other));
    assert_eq!(CacheKey::get(&url).cache_hash().len(), 64);
  }

  #[test]
  fn test_partition_names() {
    let names = PartitionNames::new("dot", "v2");
    assert_eq!(names.static_name, "dot-static-v2");
    assert_eq!(names.dynamic_name, "dot-dynamic-v2");
    assert_eq!(names.current().len(), 2);
  }
}
