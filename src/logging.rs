//! Logging setup.

use color_eyre::{eyre::eyre, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Target for analytics events so they can be filtered or routed separately.
pub const ANALYTICS_TARGET: &str = "dot_offline::analytics";

/// Install the global tracing subscriber.
///
/// RUST_LOG takes precedence over the configured level. When a log directory
/// is configured, output goes to a daily-rolling file through a non-blocking
/// writer; keep the returned guard alive or buffered lines are lost on exit.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&config.level))
    .map_err(|e| eyre!("Invalid log filter '{}': {}", config.level, e))?;

  let (layer, guard) = match &config.directory {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "dot-offline.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = if config.json {
        fmt::layer().json().with_writer(writer).boxed()
      } else {
        fmt::layer().with_ansi(false).with_writer(writer).boxed()
      };
      (layer, Some(guard))
    }
    None => {
      let layer = if config.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
      } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
      };
      (layer, None)
    }
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

/// Record a product analytics event.
pub fn track_event(event: &str, detail: Option<&str>) {
  info!(target: ANALYTICS_TARGET, event, detail, "Event tracked");
}
