//! Message loop that drives a [`ServiceWorker`] on its own task.

use color_eyre::{eyre::eyre, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::context::{ClientAction, ServiceWorker, WorkerState};
use super::router::RouteOutcome;
use crate::net::Request;
use crate::sync::DrainReport;

/// Events the platform (or the page) delivers to the worker.
#[derive(Debug)]
pub enum WorkerMessage {
  Install {
    reply: oneshot::Sender<Result<()>>,
  },
  Activate {
    reply: oneshot::Sender<Result<Vec<String>>>,
  },
  Fetch {
    request: Request,
    reply: oneshot::Sender<RouteOutcome>,
  },
  Sync {
    tag: String,
    reply: oneshot::Sender<Result<Option<DrainReport>>>,
  },
  Push {
    text: Option<String>,
    reply: oneshot::Sender<()>,
  },
  NotificationClick {
    action: Option<String>,
    reply: oneshot::Sender<Option<ClientAction>>,
  },
  State {
    reply: oneshot::Sender<WorkerState>,
  },
}

/// Sending side of the worker's message channel.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerMessage>,
}

/// Start the worker's message loop.
///
/// The loop ends once every handle has been dropped.
pub fn spawn(worker: ServiceWorker) -> WorkerHandle {
  let (tx, rx) = mpsc::unbounded_channel();
  tokio::spawn(run(worker, rx));
  WorkerHandle { tx }
}

async fn run(mut worker: ServiceWorker, mut rx: mpsc::UnboundedReceiver<WorkerMessage>) {
  while let Some(message) = rx.recv().await {
    match message {
      WorkerMessage::Install { reply } => {
        let _ = reply.send(worker.install().await);
      }
      WorkerMessage::Activate { reply } => {
        let _ = reply.send(worker.activate().await);
      }
      WorkerMessage::Fetch { request, reply } => match worker.active_router() {
        Some(router) => {
          // Concurrent in-flight fetches; cache writes are last-writer-wins
          tokio::spawn(async move {
            let _ = reply.send(router.route(&request).await);
          });
        }
        None => {
          let _ = reply.send(RouteOutcome::NotIntercepted);
        }
      },
      WorkerMessage::Sync { tag, reply } => {
        let _ = reply.send(worker.handle_sync(&tag).await);
      }
      WorkerMessage::Push { text, reply } => {
        worker.handle_push(text).await;
        let _ = reply.send(());
      }
      WorkerMessage::NotificationClick { action, reply } => {
        let _ = reply.send(worker.handle_notification_click(action.as_deref()));
      }
      WorkerMessage::State { reply } => {
        let _ = reply.send(worker.state());
      }
    }
  }
  debug!("Worker message loop ended");
}

impl WorkerHandle {
  async fn call<T>(
    &self,
    message: impl FnOnce(oneshot::Sender<T>) -> WorkerMessage,
  ) -> Result<T> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(message(reply))
      .map_err(|_| eyre!("Worker is not running"))?;
    rx.await.map_err(|_| eyre!("Worker dropped the reply"))
  }

  /// Run the install phase (which activates on success).
  pub async fn install(&self) -> Result<()> {
    self.call(|reply| WorkerMessage::Install { reply }).await?
  }

  pub async fn activate(&self) -> Result<Vec<String>> {
    self.call(|reply| WorkerMessage::Activate { reply }).await?
  }

  /// Hand a request to the worker. A stopped worker does not intercept.
  pub async fn fetch(&self, request: Request) -> RouteOutcome {
    match self
      .call(|reply| WorkerMessage::Fetch { request, reply })
      .await
    {
      Ok(outcome) => outcome,
      Err(e) => {
        info!("Fetch not intercepted: {}", e);
        RouteOutcome::NotIntercepted
      }
    }
  }

  /// Deliver a deferred-retry signal.
  pub async fn sync(&self, tag: &str) -> Result<Option<DrainReport>> {
    let tag = tag.to_string();
    self.call(|reply| WorkerMessage::Sync { tag, reply }).await?
  }

  pub async fn push(&self, text: Option<String>) -> Result<()> {
    self.call(|reply| WorkerMessage::Push { text, reply }).await
  }

  pub async fn notification_click(&self, action: Option<&str>) -> Result<Option<ClientAction>> {
    let action = action.map(str::to_string);
    self
      .call(|reply| WorkerMessage::NotificationClick { action, reply })
      .await
  }

  pub async fn state(&self) -> Result<WorkerState> {
    self.call(|reply| WorkerMessage::State { reply }).await
  }
}
