//! Local notifications and the push subscription handshake.
//!
//! Nothing here fails the caller: unsupported platforms, denied permission
//! and subscription errors are logged and turn into a no-op or `None`.

use async_trait::async_trait;
use color_eyre::Result;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use url::Url;

use crate::net::{Network, Request};

pub const DEFAULT_ICON: &str = "/favicon.ico";
pub const PUSH_SUBSCRIBE_PATH: &str = "/api/push/subscribe";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

impl NotificationAction {
  pub fn new(action: &str, title: &str) -> Self {
    Self {
      action: action.to_string(),
      title: title.to_string(),
      icon: None,
    }
  }

  pub fn with_icon(mut self, icon: &str) -> Self {
    self.icon = Some(icon.to_string());
    self
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOptions {
  pub icon: Option<String>,
  pub badge: Option<String>,
  /// Notifications sharing a tag replace each other
  pub tag: Option<String>,
  pub require_interaction: bool,
  pub actions: Vec<NotificationAction>,
}

impl NotificationOptions {
  pub fn tagged(tag: &str) -> Self {
    Self {
      tag: Some(tag.to_string()),
      ..Self::default()
    }
  }
}

/// A notification ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  #[serde(flatten)]
  pub options: NotificationOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
  Granted,
  Denied,
  Default,
}

/// Opaque platform-issued push subscription, mirrored to the backend as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PushSubscriptionRecord(pub serde_json::Value);

/// Platform notification and push facilities.
#[async_trait]
pub trait NotificationPlatform: Send + Sync {
  fn is_supported(&self) -> bool;

  fn push_supported(&self) -> bool;

  /// Whether a worker registration exists to show persistent notifications
  fn has_worker_registration(&self) -> bool;

  /// Ask the user (suspends until answered).
  async fn request_permission(&self) -> Permission;

  /// Show through the worker registration; survives the page.
  async fn show_persistent(&self, notification: &Notification) -> Result<()>;

  /// Show from the page context; gone with the page.
  async fn show_transient(&self, notification: &Notification) -> Result<()>;

  async fn subscribe_push(&self, application_server_key: &str) -> Result<PushSubscriptionRecord>;
}

pub struct NotificationGateway {
  platform: Arc<dyn NotificationPlatform>,
  network: Arc<dyn Network>,
  /// Origin for the push subscription upload
  origin: Url,
  vapid_public_key: Option<String>,
}

impl NotificationGateway {
  pub fn new(
    platform: Arc<dyn NotificationPlatform>,
    network: Arc<dyn Network>,
    origin: Url,
    vapid_public_key: Option<String>,
  ) -> Self {
    Self {
      platform,
      network,
      origin,
      vapid_public_key,
    }
  }

  /// Show a notification, preferring the persistent worker path.
  pub async fn show_notification(&self, title: &str, body: &str, options: NotificationOptions) {
    if !self.platform.is_supported() {
      warn!("Notifications not supported");
      return;
    }

    if self.platform.request_permission().await != Permission::Granted {
      warn!("Notification permission denied");
      return;
    }

    let mut options = options;
    if options.icon.is_none() {
      options.icon = Some(DEFAULT_ICON.to_string());
    }
    let notification = Notification {
      title: title.to_string(),
      body: body.to_string(),
      options,
    };

    let result = if self.platform.has_worker_registration() {
      self.platform.show_persistent(&notification).await
    } else {
      // Page-level notifications carry no actions or interaction flags
      let transient = Notification {
        options: NotificationOptions {
          icon: notification.options.icon.clone(),
          ..NotificationOptions::default()
        },
        ..notification
      };
      self.platform.show_transient(&transient).await
    };

    if let Err(e) = result {
      error!("Failed to show notification: {}", e);
    }
  }

  /// Subscribe to push and mirror the subscription to the backend.
  ///
  /// Returns `None` on any failure. A failed upload is logged but the
  /// subscription is still returned.
  pub async fn subscribe_to_push(&self) -> Option<PushSubscriptionRecord> {
    if !self.platform.push_supported() {
      warn!("Push notifications not supported");
      return None;
    }
    if !self.platform.has_worker_registration() {
      error!("Service worker not registered");
      return None;
    }

    let key = self.vapid_public_key.as_deref().unwrap_or("");
    let subscription = match self.platform.subscribe_push(key).await {
      Ok(subscription) => subscription,
      Err(e) => {
        error!("Failed to subscribe to push: {}", e);
        return None;
      }
    };
    info!("Push subscription created");

    if let Err(e) = self.send_subscription_to_server(&subscription).await {
      error!("Failed to send subscription to server: {}", e);
    }

    Some(subscription)
  }

  async fn send_subscription_to_server(&self, subscription: &PushSubscriptionRecord) -> Result<()> {
    let url = self.origin.join(PUSH_SUBSCRIBE_PATH)?;
    let request = Request::json(Method::POST, url, subscription)?;
    let response = self.network.fetch(&request).await?;

    if !response.is_ok() {
      return Err(color_eyre::eyre::eyre!(
        "Subscription upload rejected: {}",
        response.status
      ));
    }
    Ok(())
  }
}
