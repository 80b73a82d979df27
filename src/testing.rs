//! Scripted platform fakes shared by the unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::lifecycle::{HostEnvironment, InstallChoice, InstallPrompt, WorkerUpdater};
use crate::net::{FetchError, Network, Request, Response};
use crate::notify::{Notification, NotificationPlatform, Permission, PushSubscriptionRecord};
use crate::sync::SyncScheduler;

fn route_key(method: &Method, url: &str) -> (Method, String) {
  let url = url.split('#').next().unwrap_or(url).to_string();
  (method.clone(), url)
}

/// Network with a connectivity switch and canned responses per URL.
///
/// Unrouted requests get a 404 while online.
pub struct FakeNetwork {
  online: AtomicBool,
  routes: Mutex<HashMap<(Method, String), Response>>,
  failures: Mutex<HashMap<(Method, String), FetchError>>,
  log: Mutex<Vec<Request>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self {
      online: AtomicBool::new(true),
      routes: Mutex::new(HashMap::new()),
      failures: Mutex::new(HashMap::new()),
      log: Mutex::new(Vec::new()),
    }
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn respond(&self, method: Method, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(route_key(&method, url), response);
  }

  /// Makes every request to `url` fail with `error`.
  pub fn fail(&self, method: Method, url: &str, error: FetchError) {
    self
      .failures
      .lock()
      .unwrap()
      .insert(route_key(&method, url), error);
  }

  /// Every request issued, including those that failed.
  pub fn requests(&self) -> Vec<Request> {
    self.log.lock().unwrap().clone()
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    self.log.lock().unwrap().push(request.clone());

    if !self.online.load(Ordering::SeqCst) {
      return Err(FetchError::Offline("connection refused".to_string()));
    }

    let key = route_key(&request.method, request.url.as_str());
    if let Some(error) = self.failures.lock().unwrap().get(&key).cloned() {
      return Err(error);
    }
    Ok(
      self
        .routes
        .lock()
        .unwrap()
        .get(&key)
        .cloned()
        .unwrap_or_else(|| Response::new(404, "not found")),
    )
  }
}

#[derive(Default)]
pub struct FakeScheduler {
  fail: bool,
  tags: Mutex<Vec<String>>,
}

impl FakeScheduler {
  pub fn failing() -> Self {
    Self {
      fail: true,
      ..Self::default()
    }
  }

  pub fn tags(&self) -> Vec<String> {
    self.tags.lock().unwrap().clone()
  }
}

#[async_trait]
impl SyncScheduler for FakeScheduler {
  async fn register(&self, tag: &str) -> Result<()> {
    if self.fail {
      return Err(eyre!("sync registration rejected"));
    }
    self.tags.lock().unwrap().push(tag.to_string());
    Ok(())
  }
}

pub struct FakeHost {
  supported: bool,
  standalone: AtomicBool,
}

impl FakeHost {
  pub fn supported() -> Self {
    Self {
      supported: true,
      standalone: AtomicBool::new(false),
    }
  }

  pub fn unsupported() -> Self {
    Self {
      supported: false,
      standalone: AtomicBool::new(false),
    }
  }

  pub fn set_standalone(&self, standalone: bool) {
    self.standalone.store(standalone, Ordering::SeqCst);
  }
}

impl HostEnvironment for FakeHost {
  fn supports_service_worker(&self) -> bool {
    self.supported
  }

  fn is_standalone(&self) -> bool {
    self.standalone.load(Ordering::SeqCst)
  }
}

pub struct FakePrompt {
  choice: Option<InstallChoice>,
  shown: AtomicUsize,
}

impl FakePrompt {
  pub fn new(choice: InstallChoice) -> Self {
    Self {
      choice: Some(choice),
      shown: AtomicUsize::new(0),
    }
  }

  pub fn failing() -> Self {
    Self {
      choice: None,
      shown: AtomicUsize::new(0),
    }
  }

  pub fn shown(&self) -> usize {
    self.shown.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl InstallPrompt for FakePrompt {
  async fn prompt(&self) -> Result<InstallChoice> {
    self.shown.fetch_add(1, Ordering::SeqCst);
    self.choice.ok_or_else(|| eyre!("prompt already used"))
  }
}

#[derive(Default)]
pub struct FakeUpdater {
  fail: bool,
  calls: AtomicUsize,
}

impl FakeUpdater {
  pub fn failing() -> Self {
    Self {
      fail: true,
      ..Self::default()
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl WorkerUpdater for FakeUpdater {
  async fn update(&self) -> Result<()> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if self.fail {
      return Err(eyre!("update check failed"));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShownVia {
  Persistent,
  Transient,
}

pub struct FakeNotifications {
  permission: Permission,
  worker_registered: AtomicBool,
  display_fails: AtomicBool,
  subscribe_fails: AtomicBool,
  shown: Mutex<Vec<(ShownVia, Notification)>>,
  push_keys: Mutex<Vec<String>>,
}

impl FakeNotifications {
  fn with_permission(permission: Permission) -> Self {
    Self {
      permission,
      worker_registered: AtomicBool::new(true),
      display_fails: AtomicBool::new(false),
      subscribe_fails: AtomicBool::new(false),
      shown: Mutex::new(Vec::new()),
      push_keys: Mutex::new(Vec::new()),
    }
  }

  pub fn granted() -> Self {
    Self::with_permission(Permission::Granted)
  }

  pub fn denied() -> Self {
    Self::with_permission(Permission::Denied)
  }

  pub fn set_worker_registered(&self, registered: bool) {
    self.worker_registered.store(registered, Ordering::SeqCst);
  }

  pub fn set_display_fails(&self, fails: bool) {
    self.display_fails.store(fails, Ordering::SeqCst);
  }

  pub fn set_subscribe_fails(&self, fails: bool) {
    self.subscribe_fails.store(fails, Ordering::SeqCst);
  }

  pub fn shown(&self) -> Vec<(ShownVia, Notification)> {
    self.shown.lock().unwrap().clone()
  }

  pub fn push_keys(&self) -> Vec<String> {
    self.push_keys.lock().unwrap().clone()
  }

  fn show(&self, via: ShownVia, notification: &Notification) -> Result<()> {
    if self.display_fails.load(Ordering::SeqCst) {
      return Err(eyre!("display failed"));
    }
    self.shown.lock().unwrap().push((via, notification.clone()));
    Ok(())
  }
}

#[async_trait]
impl NotificationPlatform for FakeNotifications {
  fn is_supported(&self) -> bool {
    true
  }

  fn push_supported(&self) -> bool {
    true
  }

  fn has_worker_registration(&self) -> bool {
    self.worker_registered.load(Ordering::SeqCst)
  }

  async fn request_permission(&self) -> Permission {
    self.permission
  }

  async fn show_persistent(&self, notification: &Notification) -> Result<()> {
    self.show(ShownVia::Persistent, notification)
  }

  async fn show_transient(&self, notification: &Notification) -> Result<()> {
    self.show(ShownVia::Transient, notification)
  }

  async fn subscribe_push(&self, application_server_key: &str) -> Result<PushSubscriptionRecord> {
    if self.subscribe_fails.load(Ordering::SeqCst) {
      return Err(eyre!("push service unavailable"));
    }
    self
      .push_keys
      .lock()
      .unwrap()
      .push(application_server_key.to_string());
    Ok(PushSubscriptionRecord(json!({
      "endpoint": "https://push.example/abc",
      "keys": {"p256dh": "p256", "auth": "secret"}
    })))
  }
}
