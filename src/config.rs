use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::PartitionNames;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the front end is served from; root-relative paths resolve against it
  pub origin: String,
  /// Build tag baked into cache partition names
  pub build_version: String,
  pub cache_prefix: String,
  /// Path prefix that marks a request as an API call
  pub api_prefix: String,
  /// Document served for navigations when both cache and network miss
  pub offline_document: String,
  /// Root-relative paths stored in the static partition during install
  pub precache: Vec<String>,
  /// Build-emitted asset manifest (JSON) whose paths are appended to `precache`
  pub asset_manifest: Option<PathBuf>,
  /// Location of the worker-durable database (defaults to the user data dir)
  pub database_path: Option<PathBuf>,
  pub notifications: NotificationConfig,
  pub push: PushConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  /// Title used for push-delivered notifications
  pub app_name: String,
  pub icon: String,
  pub badge: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PushConfig {
  /// VAPID application server key handed to the push subscription
  pub vapid_public_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter when RUST_LOG is not set (e.g. "info", "dot_offline=debug")
  pub level: String,
  /// Write daily-rolling log files here instead of stderr
  pub directory: Option<PathBuf>,
  pub json: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost/".to_string(),
      build_version: "v1".to_string(),
      cache_prefix: "dot".to_string(),
      api_prefix: "/api/".to_string(),
      offline_document: "/index.html".to_string(),
      precache: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/manifest.json".to_string(),
        "/favicon.ico".to_string(),
      ],
      asset_manifest: None,
      database_path: None,
      notifications: NotificationConfig::default(),
      push: PushConfig::default(),
      logging: LoggingConfig::default(),
    }
  }
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      app_name: "DOT Platform".to_string(),
      icon: "/favicon.ico".to_string(),
      badge: "/favicon.ico".to_string(),
    }
  }
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
      json: false,
    }
  }
}

/// Shapes accepted for the build-emitted asset manifest.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AssetManifest {
  /// Plain list of root-relative paths
  Paths(Vec<String>),
  /// Bundler manifest keyed by entry name
  Bundler(BTreeMap<String, BundlerEntry>),
}

#[derive(Debug, Deserialize)]
struct BundlerEntry {
  file: String,
  #[serde(default)]
  css: Vec<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./dot-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/dot-offline/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    Ok(config.with_env_overrides())
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("dot-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("dot-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Apply environment overrides.
  ///
  /// DOT_VAPID_PUBLIC_KEY replaces the push key, DOT_BUILD_VERSION the build tag.
  fn with_env_overrides(mut self) -> Self {
    if let Ok(key) = std::env::var("DOT_VAPID_PUBLIC_KEY") {
      self.push.vapid_public_key = Some(key);
    }
    if let Ok(version) = std::env::var("DOT_BUILD_VERSION") {
      self.build_version = version;
    }
    self
  }

  /// Names of the two partitions owned by the current build.
  pub fn partitions(&self) -> PartitionNames {
    PartitionNames::new(&self.cache_prefix, &self.build_version)
  }

  /// Resolve a root-relative path against the configured origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    Url::parse(&self.origin)
      .and_then(|origin| origin.join(path))
      .map_err(|e| eyre!("Failed to resolve {} against {}: {}", path, self.origin, e))
  }

  /// Full pre-cache list: configured paths followed by build-emitted assets.
  pub fn precache_paths(&self) -> Result<Vec<String>> {
    let mut paths = self.precache.clone();

    if let Some(manifest_path) = &self.asset_manifest {
      let contents = std::fs::read_to_string(manifest_path).map_err(|e| {
        eyre!(
          "Failed to read asset manifest {}: {}",
          manifest_path.display(),
          e
        )
      })?;
      let manifest: AssetManifest = serde_json::from_str(&contents).map_err(|e| {
        eyre!(
          "Failed to parse asset manifest {}: {}",
          manifest_path.display(),
          e
        )
      })?;

      let emitted = match manifest {
        AssetManifest::Paths(list) => list,
        AssetManifest::Bundler(entries) => entries
          .into_values()
          .flat_map(|entry| std::iter::once(entry.file).chain(entry.css))
          .collect(),
      };

      for asset in emitted {
        let asset = if asset.starts_with('/') {
          asset
        } else {
          format!("/{}", asset)
        };
        if !paths.contains(&asset) {
          paths.push(asset);
        }
      }
    }

    Ok(paths)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.api_prefix, "/api/");
    assert_eq!(config.offline_document, "/index.html");
    assert_eq!(config.partitions().static_name, "dot-static-v1");
    assert_eq!(config.partitions().dynamic_name, "dot-dynamic-v1");
  }

  #[test]
  fn test_load_from_yaml() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
      file,
      "origin: https://dot.example/\nbuild_version: v7\nnotifications:\n  app_name: DOT"
    )
    .unwrap();

    let config = Config::load_from_path(file.path()).unwrap();
    assert_eq!(config.origin, "https://dot.example/");
    assert_eq!(config.build_version, "v7");
    assert_eq!(config.notifications.app_name, "DOT");
    // Unspecified fields keep their defaults
    assert_eq!(config.notifications.icon, "/favicon.ico");
    assert_eq!(config.precache.len(), 4);
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let result = Config::load(Some(Path::new("/definitely/not/here.yaml")));
    assert!(result.is_err());
  }

  #[test]
  fn test_precache_with_bundler_manifest() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
      file,
      r#"{{"src/main.tsx": {{"file": "assets/main-abc.js", "css": ["assets/main-abc.css"]}}}}"#
    )
    .unwrap();

    let config = Config {
      asset_manifest: Some(file.path().to_path_buf()),
      ..Config::default()
    };

    let paths = config.precache_paths().unwrap();
    assert_eq!(paths.len(), 6);
    assert!(paths.contains(&"/assets/main-abc.js".to_string()));
    assert!(paths.contains(&"/assets/main-abc.css".to_string()));
  }

  #[test]
  fn test_precache_with_path_list_dedupes() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"["/index.html", "/assets/app.js"]"#).unwrap();

    let config = Config {
      asset_manifest: Some(file.path().to_path_buf()),
      ..Config::default()
    };

    let paths = config.precache_paths().unwrap();
    assert_eq!(paths.len(), 5);
    assert_eq!(paths.last().map(String::as_str), Some("/assets/app.js"));
  }

  #[test]
  fn test_resolve_root_relative() {
    let config = Config {
      origin: "https://dot.example/".to_string(),
      ..Config::default()
    };
    let url = config.resolve("/api/blog/posts").unwrap();
    assert_eq!(url.as_str(), "https://dot.example/api/blog/posts");
  }
}
