//! Install / update lifecycle of the offline-capable app.
//!
//! The controller is fed platform signals (install possible, app installed,
//! new version staged) and exposes the imperative install and update actions.
//! Every transition is published as a [`LifecycleEvent`] to subscribers.

use async_trait::async_trait;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::logging::track_event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallationState {
  Unknown,
  Installable,
  /// Terminal
  Installed,
  /// Terminal; no install or update affordances are ever offered
  NotSupported,
}

/// What the user picked in the platform install prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallChoice {
  Accepted,
  Dismissed,
}

/// Result of [`LifecycleController::install`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallOutcome {
  Accepted,
  Dismissed,
  /// No install prompt was available
  Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
  StateChanged {
    from: InstallationState,
    to: InstallationState,
  },
  /// A new version is staged and waiting for `request_update`
  UpdateAvailable,
  /// The staged version was activated; the caller should reload
  UpdateApplied,
}

/// Capabilities of the hosting platform.
pub trait HostEnvironment: Send + Sync {
  fn supports_service_worker(&self) -> bool;

  /// Running in standalone display mode (launched as an installed app)
  fn is_standalone(&self) -> bool;
}

/// Deferred install prompt handed over with the "install is possible" signal.
#[async_trait]
pub trait InstallPrompt: Send + Sync {
  /// Show the prompt and wait for the user's choice.
  async fn prompt(&self) -> Result<InstallChoice>;
}

/// Asks the platform to update the registered worker.
#[async_trait]
pub trait WorkerUpdater: Send + Sync {
  async fn update(&self) -> Result<()>;
}

struct LifecycleState {
  installation: InstallationState,
  update_available: bool,
  prompt: Option<Arc<dyn InstallPrompt>>,
}

pub struct LifecycleController {
  host: Arc<dyn HostEnvironment>,
  updater: Option<Arc<dyn WorkerUpdater>>,
  state: Mutex<LifecycleState>,
  events: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleController {
  /// Create the controller. Platform support is checked once, here.
  pub fn new(host: Arc<dyn HostEnvironment>, updater: Option<Arc<dyn WorkerUpdater>>) -> Self {
    let installation = if !host.supports_service_worker() {
      warn!("Service workers not supported");
      InstallationState::NotSupported
    } else if host.is_standalone() {
      InstallationState::Installed
    } else {
      InstallationState::Unknown
    };

    let (events, _) = broadcast::channel(32);

    Self {
      host,
      updater,
      state: Mutex::new(LifecycleState {
        installation,
        update_available: false,
        prompt: None,
      }),
      events,
    }
  }

  /// Register interest in lifecycle transitions.
  pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
    self.events.subscribe()
  }

  pub fn state(&self) -> InstallationState {
    self.lock().installation
  }

  pub fn update_available(&self) -> bool {
    self.lock().update_available
  }

  pub fn can_install(&self) -> bool {
    let state = self.lock();
    state.installation == InstallationState::Installable && state.prompt.is_some()
  }

  pub fn is_standalone(&self) -> bool {
    self.host.is_standalone()
  }

  /// Platform signal: the app can be installed.
  pub fn on_install_prompt(&self, prompt: Arc<dyn InstallPrompt>) {
    let mut state = self.lock();
    match state.installation {
      InstallationState::Unknown | InstallationState::Installable => {
        state.prompt = Some(prompt);
        info!("Install prompt ready");
        self.transition(&mut state, InstallationState::Installable);
      }
      other => debug!(state = ?other, "Ignoring install prompt"),
    }
  }

  /// Platform signal: the app was installed (by us or externally).
  pub fn on_app_installed(&self) {
    let mut state = self.lock();
    if state.installation == InstallationState::NotSupported {
      return;
    }
    state.prompt = None;
    self.transition(&mut state, InstallationState::Installed);
  }

  /// Platform signal: a new version finished installing and is waiting.
  ///
  /// Returns true when this newly raised the update flag.
  pub fn on_update_staged(&self) -> bool {
    let mut state = self.lock();
    if state.installation == InstallationState::NotSupported || state.update_available {
      return false;
    }
    state.update_available = true;
    info!("New version available");
    let _ = self.events.send(LifecycleEvent::UpdateAvailable);
    true
  }

  /// Show the install prompt, if one is available.
  pub async fn install(&self) -> InstallOutcome {
    // The prompt is taken out while it is showing so it cannot be shown twice
    let prompt = {
      let mut state = self.lock();
      if state.installation != InstallationState::Installable {
        None
      } else {
        state.prompt.take()
      }
    };

    let Some(prompt) = prompt else {
      warn!("Install prompt not available");
      return InstallOutcome::Unavailable;
    };

    match prompt.prompt().await {
      Ok(choice) => {
        info!(outcome = ?choice, "Install choice");
        track_event(
          "pwa_install_prompt",
          Some(match choice {
            InstallChoice::Accepted => "accepted",
            InstallChoice::Dismissed => "dismissed",
          }),
        );

        let mut state = self.lock();
        match choice {
          InstallChoice::Accepted => {
            self.transition(&mut state, InstallationState::Installed);
            InstallOutcome::Accepted
          }
          InstallChoice::Dismissed => {
            // Still installable later unless a signal moved us on meanwhile
            if state.installation == InstallationState::Installable && state.prompt.is_none() {
              state.prompt = Some(prompt);
            }
            InstallOutcome::Dismissed
          }
        }
      }
      Err(e) => {
        error!("Install prompt failed: {}", e);
        InstallOutcome::Unavailable
      }
    }
  }

  /// Activate the staged version.
  ///
  /// Failures are logged and leave the update flag raised.
  pub async fn request_update(&self) {
    if self.state() == InstallationState::NotSupported {
      return;
    }

    let Some(updater) = &self.updater else {
      warn!("No worker registration to update");
      return;
    };

    match updater.update().await {
      Ok(()) => {
        info!("Service worker updated");
        let mut state = self.lock();
        if state.update_available {
          state.update_available = false;
          let _ = self.events.send(LifecycleEvent::UpdateApplied);
        }
      }
      Err(e) => error!("Service worker update failed: {}", e),
    }
  }

  fn transition(&self, state: &mut LifecycleState, to: InstallationState) {
    let from = state.installation;
    if from == to {
      return;
    }

    let allowed = match (from, to) {
      (InstallationState::NotSupported, _) => false,
      (InstallationState::Installed, _) => false,
      (_, InstallationState::Unknown) => false,
      _ => true,
    };
    if !allowed {
      debug!(?from, ?to, "Rejected lifecycle transition");
      return;
    }

    state.installation = to;
    info!(?from, ?to, "Installation state changed");
    let _ = self.events.send(LifecycleEvent::StateChanged { from, to });
  }

  fn lock(&self) -> MutexGuard<'_, LifecycleState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{FakeHost, FakePrompt, FakeUpdater};

  fn controller() -> LifecycleController {
    LifecycleController::new(Arc::new(FakeHost::supported()), None)
  }

  #[test]
  fn test_not_supported_is_terminal() {
    let controller = LifecycleController::new(Arc::new(FakeHost::unsupported()), None);
    assert_eq!(controller.state(), InstallationState::NotSupported);

    controller.on_install_prompt(Arc::new(FakePrompt::new(InstallChoice::Accepted)));
    controller.on_app_installed();
    assert!(!controller.on_update_staged());

    assert_eq!(controller.state(), InstallationState::NotSupported);
    assert!(!controller.can_install());
    assert!(!controller.update_available());
  }

  #[test]
  fn test_standalone_host_starts_installed() {
    let host = FakeHost::supported();
    host.set_standalone(true);
    let controller = LifecycleController::new(Arc::new(host), None);
    assert_eq!(controller.state(), InstallationState::Installed);
    assert!(controller.is_standalone());
  }

  #[test]
  fn test_install_prompt_makes_installable() {
    let controller = controller();
    let mut events = controller.subscribe();

    assert!(!controller.can_install());
    controller.on_install_prompt(Arc::new(FakePrompt::new(InstallChoice::Accepted)));

    assert_eq!(controller.state(), InstallationState::Installable);
    assert!(controller.can_install());
    assert_eq!(
      events.try_recv().unwrap(),
      LifecycleEvent::StateChanged {
        from: InstallationState::Unknown,
        to: InstallationState::Installable
      }
    );
  }

  #[tokio::test]
  async fn test_install_accepted() {
    let controller = controller();
    let prompt = Arc::new(FakePrompt::new(InstallChoice::Accepted));
    controller.on_install_prompt(prompt.clone());

    assert_eq!(controller.install().await, InstallOutcome::Accepted);
    assert_eq!(controller.state(), InstallationState::Installed);
    assert!(!controller.can_install());
    assert_eq!(prompt.shown(), 1);
  }

  #[tokio::test]
  async fn test_install_dismissed_keeps_prompt() {
    let controller = controller();
    let prompt = Arc::new(FakePrompt::new(InstallChoice::Dismissed));
    controller.on_install_prompt(prompt.clone());

    assert_eq!(controller.install().await, InstallOutcome::Dismissed);
    assert_eq!(controller.state(), InstallationState::Installable);
    assert!(controller.can_install());
  }

  #[tokio::test]
  async fn test_install_without_prompt_is_unavailable() {
    let controller = controller();
    assert_eq!(controller.install().await, InstallOutcome::Unavailable);
    assert_eq!(controller.state(), InstallationState::Unknown);
  }

  #[tokio::test]
  async fn test_install_prompt_error_is_unavailable() {
    let controller = controller();
    controller.on_install_prompt(Arc::new(FakePrompt::failing()));
    assert_eq!(controller.install().await, InstallOutcome::Unavailable);
  }

  #[test]
  fn test_installed_never_reverts_to_installable() {
    let controller = controller();
    controller.on_install_prompt(Arc::new(FakePrompt::new(InstallChoice::Accepted)));
    controller.on_app_installed();
    assert_eq!(controller.state(), InstallationState::Installed);

    let mut events = controller.subscribe();
    controller.on_install_prompt(Arc::new(FakePrompt::new(InstallChoice::Accepted)));

    assert_eq!(controller.state(), InstallationState::Installed);
    assert!(!controller.can_install());
    assert!(events.try_recv().is_err());
  }

  #[test]
  fn test_external_install_from_unknown() {
    let controller = controller();
    controller.on_app_installed();
    assert_eq!(controller.state(), InstallationState::Installed);
  }

  #[tokio::test]
  async fn test_update_flag_independent_of_install_state() {
    let updater = Arc::new(FakeUpdater::default());
    let controller = LifecycleController::new(Arc::new(FakeHost::supported()), Some(updater.clone()));
    controller.on_app_installed();
    let mut events = controller.subscribe();

    assert!(controller.on_update_staged());
    assert!(!controller.on_update_staged());
    assert!(controller.update_available());
    assert_eq!(events.try_recv().unwrap(), LifecycleEvent::UpdateAvailable);

    controller.request_update().await;
    assert!(!controller.update_available());
    assert_eq!(updater.calls(), 1);
    assert_eq!(events.try_recv().unwrap(), LifecycleEvent::UpdateApplied);
    assert_eq!(controller.state(), InstallationState::Installed);
  }

  #[tokio::test]
  async fn test_failed_update_keeps_flag() {
    let updater = Arc::new(FakeUpdater::failing());
    let controller = LifecycleController::new(Arc::new(FakeHost::supported()), Some(updater));

    controller.on_update_staged();
    controller.request_update().await;
    assert!(controller.update_available());
  }
}
