//! Offline-resilience layer for the DOT platform front end.
//!
//! A background worker intercepts the application's requests and applies a
//! caching policy per request class, backed by versioned cache partitions.
//! Mutations that fail for lack of connectivity are kept in a durable queue
//! and replayed once the connection returns. [`OfflineService`] is the
//! page-side entry point; [`bootstrap`] wires it up from configuration.

pub mod cache;
pub mod config;
pub mod db;
pub mod event;
pub mod lifecycle;
pub mod logging;
pub mod net;
pub mod notify;
pub mod service;
pub mod sync;
pub mod worker;

#[cfg(test)]
mod testing;

use color_eyre::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;

pub use config::Config;
pub use event::{EventStream, ServiceEvent};
pub use service::{MutationOutcome, OfflineService, Platform};

/// Load configuration, install error reporting and logging, open the
/// database and start the service.
///
/// Keep the returned guard alive for as long as file logging should flush.
pub async fn bootstrap(
  config_path: Option<&Path>,
  platform: Platform,
) -> Result<(OfflineService, Option<WorkerGuard>)> {
  if color_eyre::install().is_err() {
    debug!("Error report hook already installed");
  }

  let config = Config::load(config_path)?;
  let guard = logging::init(&config.logging)?;

  let db = Arc::new(db::Database::open(config.database_path.as_deref())?);
  let service = OfflineService::start(config, db, platform).await?;

  Ok((service, guard))
}
