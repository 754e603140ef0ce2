use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  /// Bare token file written by older client versions (default: $XDG_DATA_HOME/shiru/auth_token)
  pub legacy_token_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  #[serde(default = "default_base_url")]
  pub base_url: String,
  /// Request timeout; a timed out request counts as a remote failure
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_base_url() -> String {
  "http://localhost:5001".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Database file (default: $XDG_DATA_HOME/shiru/offline.db)
  pub path: Option<PathBuf>,
  /// Keep everything in memory; nothing survives the process
  #[serde(default)]
  pub ephemeral: bool,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shiru.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shiru/config.yaml
  ///
  /// Without a file the defaults are used. `SHIRU_API_URL` overrides the API url.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        debug!("no configuration file found, using defaults");
        Config::default()
      }
    };

    if let Ok(url) = std::env::var("SHIRU_API_URL") {
      config.api.base_url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("shiru.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shiru").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    // An empty file deserializes to null
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Directory for the database, legacy token and logs.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shiru"))
  }

  pub fn legacy_token_path(&self) -> Result<PathBuf> {
    match &self.legacy_token_path {
      Some(path) => Ok(path.clone()),
      None => Ok(Self::data_dir()?.join("auth_token")),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.api.base_url, "http://localhost:5001");
    assert_eq!(config.api.timeout_secs, 30);
    assert!(!config.storage.ephemeral);
    assert!(config.storage.path.is_none());
  }

  #[test]
  fn test_partial_file() {
    let config = Config::parse(
      "api:\n  base_url: https://shiru.example\nstorage:\n  ephemeral: true\nlegacy_token_path: /tmp/tok\n",
    )
    .unwrap();
    assert_eq!(config.api.base_url, "https://shiru.example");
    assert_eq!(config.api.timeout_secs, 30);
    assert!(config.storage.ephemeral);
    assert_eq!(
      config.legacy_token_path().unwrap(),
      PathBuf::from("/tmp/tok")
    );
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/shiru.yaml"))).is_err());
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shiru.yaml");
    std::fs::write(&path, "api:\n  timeout_secs: 5\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.api.timeout_secs, 5);
  }
}
