use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  /// Release version of the embedding application, compared against the
  /// persisted cache-version marker at startup.
  #[serde(default = "default_app_version")]
  pub app_version: String,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub batch: BatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub url: String,
  /// Content language requested from the API (e.g., "ko").
  #[serde(default = "default_language")]
  pub language: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Override for the snapshot database path (defaults to the platform
  /// data directory).
  pub path: Option<PathBuf>,
  /// Seconds between debounced snapshot writes.
  #[serde(default = "default_persist_interval")]
  pub persist_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
  /// Width of the batching window in milliseconds.
  #[serde(default = "default_batch_interval")]
  pub interval_ms: u64,
  /// Maximum operations coalesced into one physical request.
  #[serde(default = "default_batch_max")]
  pub max_operations: usize,
}

fn default_app_version() -> String {
  env!("CARGO_PKG_VERSION").to_string()
}

fn default_language() -> String {
  "ko".to_string()
}

fn default_persist_interval() -> u64 {
  5
}

fn default_batch_interval() -> u64 {
  10
}

fn default_batch_max() -> usize {
  10
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      path: None,
      persist_interval_secs: default_persist_interval(),
    }
  }
}

impl Default for BatchConfig {
  fn default() -> Self {
    Self {
      interval_ms: default_batch_interval(),
      max_operations: default_batch_max(),
    }
  }
}

impl ApiConfig {
  /// Full endpoint URL with the language query parameter attached.
  pub fn endpoint(&self) -> Result<Url> {
    let mut url = Url::parse(&self.url)
      .map_err(|e| SyncError::Config(format!("Invalid API url {}: {}", self.url, e)))?;
    url
      .query_pairs_mut()
      .append_pair("language", &self.language);
    Ok(url)
  }
}

impl CacheConfig {
  pub fn persist_interval(&self) -> Duration {
    Duration::from_secs(self.persist_interval_secs.max(1))
  }
}

impl BatchConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_millis(self.interval_ms)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./storysync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/storysync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(SyncError::Config(format!(
          "Config file not found: {}",
          p.display()
        )));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(SyncError::Config(
        "No configuration file found. Create one at ~/.config/storysync/config.yaml".to_string(),
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("storysync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("storysync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| SyncError::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| SyncError::Config(format!("Failed to parse config file {}: {}", path.display(), e)))?;

    Ok(config)
  }

  /// In-memory configuration for a given API url, no config file involved.
  pub fn for_api(url: impl Into<String>) -> Self {
    Self {
      api: ApiConfig {
        url: url.into(),
        language: default_language(),
      },
      app_version: default_app_version(),
      cache: CacheConfig::default(),
      batch: BatchConfig::default(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn endpoint_carries_language_param() {
    let config = Config::for_api("https://api.example.com/graphql");
    let endpoint = config.api.endpoint().unwrap();
    assert_eq!(
      endpoint.as_str(),
      "https://api.example.com/graphql?language=ko"
    );
  }

  #[test]
  fn parses_minimal_yaml() {
    let config: Config = serde_yaml::from_str("api:\n  url: https://api.example.com/graphql\n").unwrap();
    assert_eq!(config.api.language, "ko");
    assert_eq!(config.batch.max_operations, 10);
    assert_eq!(config.cache.persist_interval_secs, 5);
  }
}
