use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::{Classifier, PartitionNames};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the dashboard is served from
  pub origin: String,
  pub cache: CacheConfig,
  /// URL patterns deciding which strategy serves a request
  pub classifier: Classifier,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:5000".to_string(),
      cache: CacheConfig::default(),
      classifier: Classifier::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Partition names are `<prefix>-static-<version>` and `<prefix>-api-<version>`
  pub prefix: String,
  /// Bumping this drops the old partitions on the next activation
  pub version: String,
  /// How long API entries are served without a foreground fetch
  pub freshness_hours: u32,
  /// Upper bound on a single network request
  pub fetch_timeout_secs: u64,
  /// Cache database location (default: $XDG_DATA_HOME/mgnrega-offline/cache.db)
  pub database: Option<PathBuf>,
  /// Documents pre-cached on install
  pub seed_urls: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "mgnrega".to_string(),
      version: "v2".to_string(),
      freshness_hours: 24,
      fetch_timeout_secs: 10,
      database: None,
      seed_urls: vec!["/".to_string(), "/manifest.json".to_string()],
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./mgnrega-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/mgnrega-offline/config.yaml
  ///
  /// Falls back to defaults when no file is found. `MGNREGA_ORIGIN`
  /// overrides the origin either way.
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
      None => Self::default(),
    };

    if let Some(origin) = Self::get_origin_override() {
      config.origin = origin;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("mgnrega-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("mgnrega-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  /// Origin override from the MGNREGA_ORIGIN environment variable.
  fn get_origin_override() -> Option<String> {
    std::env::var("MGNREGA_ORIGIN")
      .ok()
      .filter(|v| !v.trim().is_empty())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))
  }

  pub fn partition_names(&self) -> PartitionNames {
    PartitionNames::versioned(&self.cache.prefix, &self.cache.version)
  }

  pub fn freshness_window(&self) -> chrono::Duration {
    chrono::Duration::hours(i64::from(self.cache.freshness_hours))
  }

  pub fn fetch_timeout(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.cache.fetch_timeout_secs)
  }

  /// Path of the cache database.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.cache.database {
      return Ok(path.clone());
    }
    Ok(data_dir()?.join("cache.db"))
  }
}

/// Per-user data directory for the cache database and logs.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("mgnrega-offline"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_yaml_gives_defaults() {
    let config = Config::from_yaml("{}").unwrap();
    assert_eq!(config.origin, "http://localhost:5000");
    assert_eq!(config.cache.freshness_hours, 24);
    assert_eq!(config.freshness_window(), chrono::Duration::hours(24));
    assert_eq!(config.classifier, Classifier::default());
    assert_eq!(
      config.partition_names(),
      PartitionNames::versioned("mgnrega", "v2")
    );
  }

  #[test]
  fn test_partial_overrides() {
    let yaml = r#"
origin: https://mgnrega.example.in
cache:
  version: v3
  fetch_timeout_secs: 3
  database: /tmp/mgnrega.db
classifier:
  static_extensions: [".js", ".webp"]
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.origin_url().unwrap().as_str(), "https://mgnrega.example.in/");
    assert_eq!(config.partition_names().api, "mgnrega-api-v3");
    assert_eq!(config.fetch_timeout(), std::time::Duration::from_secs(3));
    assert_eq!(config.database_path().unwrap(), PathBuf::from("/tmp/mgnrega.db"));
    assert_eq!(config.cache.seed_urls, vec!["/", "/manifest.json"]);
    assert_eq!(config.classifier.api_root, "/api/");
    assert_eq!(config.classifier.static_extensions, vec![".js", ".webp"]);
  }

  #[test]
  fn test_invalid_origin_is_error() {
    let config = Config::from_yaml("origin: not a url").unwrap();
    assert!(config.origin_url().is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/mgnrega.yaml"))).is_err());
  }
}
