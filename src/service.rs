//! Page-side entry point to the offline layer.
//!
//! [`OfflineService`] is built once at startup and handed to whichever UI
//! code needs it. It registers the worker, tracks connectivity, owns the
//! page's handle on the sync queue and fronts the lifecycle controller and
//! the notification gateway.

use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use url::Url;

use crate::cache::SqliteCacheStore;
use crate::config::Config;
use crate::db::Database;
use crate::event::{forward_lifecycle, EventStream, ServiceEvent};
use crate::lifecycle::{
  HostEnvironment, InstallOutcome, InstallPrompt, InstallationState, LifecycleController,
  WorkerUpdater,
};
use crate::logging::track_event;
use crate::net::{Network, Request, Response};
use crate::notify::{
  NotificationAction, NotificationGateway, NotificationOptions, NotificationPlatform,
  PushSubscriptionRecord,
};
use crate::sync::{DrainReport, SqliteQueueStore, SyncKind, SyncQueue, SyncScheduler};
use crate::worker::{self, RouteOutcome, ServiceWorker, WorkerHandle};

/// Metadata key holding the build version of the last activated worker.
const ACTIVE_VERSION_KEY: &str = "active_version";

/// Platform facilities the service is wired to.
#[derive(Clone)]
pub struct Platform {
  pub network: Arc<dyn Network>,
  pub host: Arc<dyn HostEnvironment>,
  pub notifications: Arc<dyn NotificationPlatform>,
  /// Deferred-retry registration; `None` when the platform has none
  pub scheduler: Option<Arc<dyn SyncScheduler>>,
  pub updater: Option<Arc<dyn WorkerUpdater>>,
}

/// Result of [`OfflineService::send_mutation`].
#[derive(Debug)]
pub enum MutationOutcome {
  /// The server answered (any status)
  Sent(Response),
  /// No connectivity; the mutation was queued under this task id
  Queued(String),
}

pub struct OfflineService {
  config: Config,
  db: Arc<Database>,
  origin: Url,
  network: Arc<dyn Network>,
  queue: SyncQueue,
  worker: Option<WorkerHandle>,
  lifecycle: Arc<LifecycleController>,
  notifications: NotificationGateway,
  online: AtomicBool,
  events: broadcast::Sender<ServiceEvent>,
}

impl OfflineService {
  /// Build the service and register the worker.
  ///
  /// A worker that fails to register or install is logged and left out; the
  /// service then runs without offline support. Only configuration errors
  /// are returned.
  pub async fn start(config: Config, db: Arc<Database>, platform: Platform) -> Result<Self> {
    let origin = config.resolve("/")?;

    let mut queue = SyncQueue::new(
      Arc::new(SqliteQueueStore::new(db.clone())),
      platform.network.clone(),
      origin.clone(),
    );
    if let Some(scheduler) = &platform.scheduler {
      queue = queue.with_scheduler(scheduler.clone());
    }

    let lifecycle = Arc::new(LifecycleController::new(
      platform.host.clone(),
      platform.updater.clone(),
    ));
    let (events, _) = broadcast::channel(64);
    forward_lifecycle(lifecycle.subscribe(), events.clone());

    let notifications = NotificationGateway::new(
      platform.notifications.clone(),
      platform.network.clone(),
      origin.clone(),
      config.push.vapid_public_key.clone(),
    );

    let worker = if lifecycle.state() == InstallationState::NotSupported {
      None
    } else {
      info!("Registering service worker");
      match Self::register_worker(&config, &db, &platform, queue.clone()).await {
        Ok(handle) => {
          info!(version = %config.build_version, "Service worker registered");
          Some(handle)
        }
        Err(e) => {
          error!("Service worker registration failed: {}", e);
          None
        }
      }
    };

    let service = Self {
      config,
      db,
      origin,
      network: platform.network,
      queue,
      worker,
      lifecycle,
      notifications,
      online: AtomicBool::new(true),
      events,
    };

    if service.worker.is_some() {
      service.check_for_update().await;
    }

    Ok(service)
  }

  async fn register_worker(
    config: &Config,
    db: &Arc<Database>,
    platform: &Platform,
    queue: SyncQueue,
  ) -> Result<WorkerHandle> {
    let worker = ServiceWorker::new(
      config,
      Arc::new(SqliteCacheStore::new(db.clone())),
      platform.network.clone(),
      queue,
      platform.notifications.clone(),
    )?;

    let handle = worker::spawn(worker);
    handle.install().await?;
    Ok(handle)
  }

  /// Stage an update when the activated build differs from the last one seen.
  async fn check_for_update(&self) {
    let current = &self.config.build_version;

    let previous = match self.db.meta(ACTIVE_VERSION_KEY) {
      Ok(previous) => previous,
      Err(e) => {
        warn!("Could not read active version: {}", e);
        return;
      }
    };

    if let Some(previous) = previous.filter(|p| p != current) {
      info!(from = %previous, to = %current, "New version installed");
      if self.lifecycle.on_update_staged() {
        self.notify_update().await;
      }
    }

    if let Err(e) = self.db.set_meta(ACTIVE_VERSION_KEY, current) {
      warn!("Could not record active version: {}", e);
    }
  }

  async fn notify_update(&self) {
    let options = NotificationOptions {
      require_interaction: true,
      actions: vec![
        NotificationAction::new("update", "Update Now"),
        NotificationAction::new("dismiss", "Later"),
      ],
      ..NotificationOptions::tagged("app-update")
    };
    self
      .notifications
      .show_notification(
        "App Update Available",
        &format!(
          "A new version of {} is available. Restart the app to update.",
          self.config.notifications.app_name
        ),
        options,
      )
      .await;
  }

  /// Subscribe to connectivity, sync and lifecycle events.
  pub fn subscribe(&self) -> EventStream {
    EventStream::new(self.events.subscribe())
  }

  pub fn lifecycle(&self) -> &LifecycleController {
    &self.lifecycle
  }

  pub fn worker(&self) -> Option<&WorkerHandle> {
    self.worker.as_ref()
  }

  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }

  /// Connectivity signal from the platform.
  ///
  /// Coming back online drains the queue and reports the result.
  pub async fn set_online(&self, online: bool) {
    if self.online.swap(online, Ordering::SeqCst) == online {
      return;
    }

    if online {
      info!("Back online - syncing data");
      let _ = self.events.send(ServiceEvent::ConnectionRestored);
      self.drain().await;
    } else {
      info!("Gone offline - enabling offline mode");
      let _ = self.events.send(ServiceEvent::ConnectionLost);
    }
  }

  /// Drain through the shared queue handle; the worker's drains and ours
  /// are serialized by the queue itself.
  async fn drain(&self) -> Option<DrainReport> {
    match self.queue.drain().await {
      Ok(report) => {
        let _ = self.events.send(ServiceEvent::SyncCompleted(report.clone()));
        Some(report)
      }
      Err(e) => {
        error!("Sync queue drain failed: {}", e);
        None
      }
    }
  }

  /// Queue a mutation for replay. Drains right away when online.
  pub async fn queue_for_sync(&self, kind: SyncKind, payload: serde_json::Value) -> Result<String> {
    let id = self.queue.enqueue(kind, payload).await?;
    if self.is_online() {
      self.drain().await;
    }
    Ok(id)
  }

  /// Issue a mutation, capturing it into the queue if there is no connectivity.
  ///
  /// HTTP error statuses are returned as `Sent`; only a transport-level
  /// connectivity failure queues.
  pub async fn send_mutation(
    &self,
    kind: SyncKind,
    payload: serde_json::Value,
  ) -> Result<MutationOutcome> {
    if !self.is_online() {
      let id = self.queue.enqueue(kind, payload).await?;
      return Ok(MutationOutcome::Queued(id));
    }

    let endpoint = kind.endpoint();
    let url = self
      .origin
      .join(endpoint.path)
      .map_err(|e| eyre!("Failed to build endpoint URL for {}: {}", kind, e))?;
    let request = Request::json(endpoint.method, url, &payload)?;

    match self.network.fetch(&request).await {
      Ok(response) => Ok(MutationOutcome::Sent(response)),
      Err(e) if e.is_connectivity() => {
        warn!(kind = %kind, "Mutation failed offline, queueing: {}", e);
        let id = self.queue.enqueue(kind, payload).await?;
        Ok(MutationOutcome::Queued(id))
      }
      Err(e) => Err(e.into()),
    }
  }

  pub async fn pending_sync(&self) -> Result<usize> {
    self.queue.len().await
  }

  /// Route a page request through the worker, if one is registered.
  pub async fn fetch(&self, request: Request) -> RouteOutcome {
    match &self.worker {
      Some(worker) => worker.fetch(request).await,
      None => RouteOutcome::NotIntercepted,
    }
  }

  pub fn installation_state(&self) -> InstallationState {
    self.lifecycle.state()
  }

  pub fn can_install(&self) -> bool {
    self.lifecycle.can_install()
  }

  pub fn is_standalone(&self) -> bool {
    self.lifecycle.is_standalone()
  }

  pub fn update_available(&self) -> bool {
    self.lifecycle.update_available()
  }

  /// Platform signal: the app can be installed.
  pub fn on_install_prompt(&self, prompt: Arc<dyn InstallPrompt>) {
    self.lifecycle.on_install_prompt(prompt);
  }

  /// Platform signal: the app was installed.
  pub async fn on_app_installed(&self) {
    info!("App installed successfully");
    self.lifecycle.on_app_installed();
    track_event("pwa_installed", None);

    self
      .notifications
      .show_notification(
        &format!("Welcome to {}!", self.config.notifications.app_name),
        "The app has been installed successfully. You can now access it offline.",
        NotificationOptions::tagged("welcome-notification"),
      )
      .await;
  }

  pub async fn install(&self) -> InstallOutcome {
    self.lifecycle.install().await
  }

  pub async fn request_update(&self) {
    self.lifecycle.request_update().await;
  }

  pub async fn show_notification(&self, title: &str, body: &str, options: NotificationOptions) {
    self
      .notifications
      .show_notification(title, body, options)
      .await;
  }

  pub async fn subscribe_to_push(&self) -> Option<PushSubscriptionRecord> {
    self.notifications.subscribe_to_push().await
  }
}
