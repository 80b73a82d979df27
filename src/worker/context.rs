//! The background worker's own state and event handlers.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

use super::router::RequestRouter;
use crate::cache::{CacheKey, CacheStore, CachedResponse, Partition, PartitionNames};
use crate::config::{Config, NotificationConfig};
use crate::net::{Network, Request};
use crate::notify::{Notification, NotificationAction, NotificationOptions, NotificationPlatform};
use crate::sync::{DrainReport, SyncKind, SyncQueue};

/// Tag shared by push notifications so a newer push replaces an older one.
pub const PUSH_TAG: &str = "dot-notification";
pub const DEFAULT_PUSH_BODY: &str = "New update available!";

/// Worker lifecycle as seen from inside the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
  /// Install failed; this worker will never control a page
  Redundant,
}

/// What the worker asks the platform to do with its clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
  OpenWindow(String),
}

pub struct ServiceWorker {
  state: WorkerState,
  store: Arc<dyn CacheStore>,
  network: Arc<dyn Network>,
  router: Arc<RequestRouter>,
  queue: SyncQueue,
  notifications: Arc<dyn NotificationPlatform>,
  notification_config: NotificationConfig,
  partitions: PartitionNames,
  /// Resolved pre-cache manifest
  precache: Vec<Url>,
}

impl ServiceWorker {
  pub fn new(
    config: &Config,
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    queue: SyncQueue,
    notifications: Arc<dyn NotificationPlatform>,
  ) -> Result<Self> {
    let partitions = config.partitions();
    let precache = config
      .precache_paths()?
      .iter()
      .map(|path| config.resolve(path))
      .collect::<Result<Vec<_>>>()?;

    let router = RequestRouter::new(
      store.clone(),
      network.clone(),
      partitions.clone(),
      &config.api_prefix,
      config.resolve(&config.offline_document)?,
    );

    Ok(Self {
      state: WorkerState::Parsed,
      store,
      network,
      router: Arc::new(router),
      queue,
      notifications,
      notification_config: config.notifications.clone(),
      partitions,
      precache,
    })
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  /// The router, once this worker controls its clients.
  ///
  /// Until activation the platform's default network handling applies.
  pub(crate) fn active_router(&self) -> Option<Arc<RequestRouter>> {
    (self.state == WorkerState::Activated).then(|| Arc::clone(&self.router))
  }

  /// Install phase: populate the static partition, then activate at once.
  ///
  /// Every manifest entry must fetch with a 200 or nothing is stored and the
  /// worker becomes redundant.
  pub async fn install(&mut self) -> Result<()> {
    info!("Installing");
    self.state = WorkerState::Installing;

    match self.precache().await {
      Ok(count) => {
        info!(count, "Static assets cached");
        self.state = WorkerState::Installed;
      }
      Err(e) => {
        error!("Install failed: {}", e);
        self.state = WorkerState::Redundant;
        return Err(e);
      }
    }

    debug!("Skipping waiting");
    self.activate().await?;
    Ok(())
  }

  async fn precache(&self) -> Result<usize> {
    let fetched = try_join_all(self.precache.iter().map(|url| self.fetch_for_precache(url))).await?;

    let partition = Partition::open(self.store.clone(), &self.partitions.static_name).await?;
    for (key, entry) in &fetched {
      partition.put(key, entry).await?;
    }
    Ok(fetched.len())
  }

  async fn fetch_for_precache(&self, url: &Url) -> Result<(CacheKey, CachedResponse)> {
    let request = Request::get(url.clone());
    let response = self
      .network
      .fetch(&request)
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

    if !response.is_cacheable() {
      return Err(eyre!(
        "Failed to cache {}: {} {}",
        url,
        response.status,
        response.status_text
      ));
    }

    Ok((
      CacheKey::for_request(&request),
      CachedResponse::from_response(&response),
    ))
  }

  /// Activate phase: retire other builds' partitions and claim clients.
  ///
  /// Only an installed worker activates, and only once. Returns the names
  /// of the deleted partitions.
  pub async fn activate(&mut self) -> Result<Vec<String>> {
    if self.state != WorkerState::Installed {
      return Err(eyre!("Cannot activate a worker in state {:?}", self.state));
    }

    info!("Activating");
    self.state = WorkerState::Activating;

    let deleted = match self
      .store
      .delete_stale_partitions(&self.partitions.current())
      .await
    {
      Ok(deleted) => deleted,
      Err(e) => {
        error!("Activation failed: {}", e);
        self.state = WorkerState::Installed;
        return Err(e);
      }
    };

    info!("Claiming clients");
    self.state = WorkerState::Activated;
    Ok(deleted)
  }

  /// Deferred-retry signal. Any known tag drains the whole queue.
  pub async fn handle_sync(&self, tag: &str) -> Result<Option<DrainReport>> {
    info!(tag, "Background sync");

    if SyncKind::from_sync_tag(tag).is_none() {
      warn!(tag, "Unknown sync tag");
      return Ok(None);
    }

    let report = self.queue.drain().await?;
    Ok(Some(report))
  }

  /// Show a push-delivered message.
  pub async fn handle_push(&self, text: Option<String>) {
    info!("Push received");

    let config = &self.notification_config;
    let notification = Notification {
      title: config.app_name.clone(),
      body: text.unwrap_or_else(|| DEFAULT_PUSH_BODY.to_string()),
      options: NotificationOptions {
        icon: Some(config.icon.clone()),
        badge: Some(config.badge.clone()),
        tag: Some(PUSH_TAG.to_string()),
        require_interaction: true,
        actions: vec![
          NotificationAction::new("view", "View").with_icon(&config.icon),
          NotificationAction::new("dismiss", "Dismiss"),
        ],
      },
    };

    if let Err(e) = self.notifications.show_persistent(&notification).await {
      error!("Failed to show push notification: {}", e);
    }
  }

  /// A notification was clicked; the platform closes it.
  pub fn handle_notification_click(&self, action: Option<&str>) -> Option<ClientAction> {
    info!(action, "Notification clicked");
    match action {
      Some("view") => Some(ClientAction::OpenWindow("/".to_string())),
      _ => None,
    }
  }
}
