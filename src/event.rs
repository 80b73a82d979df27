use tokio::sync::broadcast;
use tracing::warn;

use crate::lifecycle::LifecycleEvent;
use crate::sync::DrainReport;

/// Events the offline service publishes to the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
  ConnectionLost,
  ConnectionRestored,
  /// A drain finished (after a reconnect or an immediate sync)
  SyncCompleted(DrainReport),
  /// Relayed install/update transition
  Lifecycle(LifecycleEvent),
}

/// Subscription to [`ServiceEvent`]s
pub struct EventStream {
  rx: broadcast::Receiver<ServiceEvent>,
}

impl EventStream {
  pub(crate) fn new(rx: broadcast::Receiver<ServiceEvent>) -> Self {
    Self { rx }
  }

  /// Receive the next event, or `None` once the service is gone.
  ///
  /// A subscriber that falls behind skips the events it missed.
  pub async fn next(&mut self) -> Option<ServiceEvent> {
    loop {
      match self.rx.recv().await {
        Ok(event) => return Some(event),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          warn!(skipped, "Event subscriber lagged");
        }
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }

  /// Next event if one is already queued.
  pub fn try_next(&mut self) -> Option<ServiceEvent> {
    loop {
      match self.rx.try_recv() {
        Ok(event) => return Some(event),
        Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
        Err(_) => return None,
      }
    }
  }
}

/// Relay lifecycle transitions onto the service channel until either side closes.
pub(crate) fn forward_lifecycle(
  mut lifecycle: broadcast::Receiver<LifecycleEvent>,
  events: broadcast::Sender<ServiceEvent>,
) {
  tokio::spawn(async move {
    loop {
      match lifecycle.recv().await {
        Ok(event) => {
          // No subscribers is fine
          let _ = events.send(ServiceEvent::Lifecycle(event));
        }
        Err(broadcast::error::RecvError::Lagged(_)) => continue,
        Err(broadcast::error::RecvError::Closed) => break,
      }
    }
  });
}
