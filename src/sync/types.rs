use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of mutation a queued task replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncKind {
  ContentCreate,
  SettingsUpdate,
  CommentCreate,
  IntegrationWrite,
}

/// REST endpoint a kind replays against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEndpoint {
  pub method: Method,
  pub path: &'static str,
}

impl SyncKind {
  pub const ALL: [SyncKind; 4] = [
    SyncKind::ContentCreate,
    SyncKind::SettingsUpdate,
    SyncKind::CommentCreate,
    SyncKind::IntegrationWrite,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      SyncKind::ContentCreate => "content-create",
      SyncKind::SettingsUpdate => "settings-update",
      SyncKind::CommentCreate => "comment-create",
      SyncKind::IntegrationWrite => "integration-write",
    }
  }

  /// Fixed endpoint table.
  pub fn endpoint(self) -> SyncEndpoint {
    match self {
      SyncKind::ContentCreate => SyncEndpoint {
        method: Method::POST,
        path: "/api/blog/posts",
      },
      SyncKind::SettingsUpdate => SyncEndpoint {
        method: Method::PUT,
        path: "/api/user/settings",
      },
      SyncKind::CommentCreate => SyncEndpoint {
        method: Method::POST,
        path: "/api/comments",
      },
      SyncKind::IntegrationWrite => SyncEndpoint {
        method: Method::POST,
        path: "/api/integrations",
      },
    }
  }

  /// Tag used when registering a deferred retry with the platform.
  pub fn sync_tag(self) -> String {
    format!("{}-sync", self.as_str())
  }

  /// Inverse of [`SyncKind::sync_tag`].
  pub fn from_sync_tag(tag: &str) -> Option<Self> {
    tag.strip_suffix("-sync").and_then(|k| k.parse().ok())
  }
}

impl fmt::Display for SyncKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SyncKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    SyncKind::ALL
      .into_iter()
      .find(|kind| kind.as_str() == s)
      .ok_or_else(|| format!("Unknown sync kind: {}", s))
  }
}

/// A pending mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTask {
  /// Generated at enqueue time, never reused
  pub id: String,
  pub kind: SyncKind,
  pub payload: serde_json::Value,
  pub enqueued_at: DateTime<Utc>,
  /// Replay attempts so far (at most one per drain)
  pub attempts: u32,
}

/// Outcome of one drain cycle, ids in queue order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
  pub succeeded: Vec<String>,
  pub failed: Vec<String>,
}

impl DrainReport {
  pub fn is_empty(&self) -> bool {
    self.succeeded.is_empty() && self.failed.is_empty()
  }
}
