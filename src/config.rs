use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::worker::generation_name;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the proxy serves, e.g. the lookbook frontend on http://localhost:3000
  pub origin: String,
  /// Path prefix under the origin that the proxy controls
  pub scope: String,
  /// Address the local HTTP front listens on
  pub listen: String,
  pub cache: CacheConfig,
  pub network: NetworkConfig,
  pub lifecycle: LifecycleConfig,
  /// Also write logs to a daily file under the data directory
  pub log_file: bool,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:3000".to_string(),
      scope: "/".to_string(),
      listen: "127.0.0.1:3080".to_string(),
      cache: CacheConfig::default(),
      network: NetworkConfig::default(),
      lifecycle: LifecycleConfig::default(),
      log_file: false,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Generation names are "<prefix>-v<version>"
  pub prefix: String,
  /// Bump on deploy to replace every older generation
  pub version: u32,
  /// SQLite database path (defaults to the data directory)
  pub database: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "lookbook".to_string(),
      version: 1,
      database: None,
    }
  }
}

impl CacheConfig {
  pub fn generation_name(&self) -> String {
    generation_name(&self.prefix, self.version)
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => Ok(Config::data_dir()?.join("cache.db")),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self { timeout_secs: 30 }
  }
}

impl NetworkConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
  /// Activate a freshly installed version without waiting for a SKIP_WAITING message
  pub skip_waiting_on_install: bool,
}

impl Default for LifecycleConfig {
  fn default() -> Self {
    Self {
      skip_waiting_on_install: true,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./lookcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/lookcache/config.yaml
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
    config.validate()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("lookcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("lookcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file deserializes as unit, not as an empty mapping
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  fn validate(&self) -> Result<()> {
    self.origin_url()?;
    self.listen_addr()?;
    if self.cache.prefix.is_empty() {
      return Err(eyre!("cache.prefix must not be empty"));
    }
    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))
  }

  pub fn listen_addr(&self) -> Result<SocketAddr> {
    self
      .listen
      .parse()
      .map_err(|e| eyre!("Invalid listen address {}: {}", self.listen, e))
  }

  /// Directory for the cache database and log files.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("lookcache"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.origin_url().unwrap().as_str(), "http://localhost:3000/");
    assert_eq!(config.cache.generation_name(), "lookbook-v1");
    assert_eq!(config.listen_addr().unwrap().port(), 3080);
    assert_eq!(config.network.timeout(), Duration::from_secs(30));
    assert!(config.lifecycle.skip_waiting_on_install);
    assert!(!config.log_file);
  }

  #[test]
  fn test_partial_file_keeps_defaults() {
    let config = Config::parse(
      r#"
origin: "https://lookbook.example.com"
cache:
  version: 7
lifecycle:
  skip_waiting_on_install: false
"#,
    )
    .unwrap();

    assert_eq!(config.origin, "https://lookbook.example.com");
    assert_eq!(config.cache.generation_name(), "lookbook-v7");
    assert!(!config.lifecycle.skip_waiting_on_install);
    assert_eq!(config.scope, "/");
    assert_eq!(config.network.timeout_secs, 30);
  }

  #[test]
  fn test_empty_file_is_default() {
    let config = Config::parse("\n").unwrap();
    assert_eq!(config.cache.version, 1);
  }

  #[test]
  fn test_explicit_database_path() {
    let config = Config::parse("cache:\n  database: /tmp/lookcache-test.db\n").unwrap();
    assert_eq!(
      config.cache.database_path().unwrap(),
      PathBuf::from("/tmp/lookcache-test.db")
    );
  }

  #[test]
  fn test_validate_rejects_bad_values() {
    let bad_origin = Config {
      origin: "not a url".to_string(),
      ..Config::default()
    };
    assert!(bad_origin.validate().is_err());

    let bad_listen = Config {
      listen: "localhost".to_string(),
      ..Config::default()
    };
    assert!(bad_listen.validate().is_err());
  }

  #[test]
  fn test_missing_explicit_file_is_an_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/lookcache.yaml"))).is_err());
  }
}
