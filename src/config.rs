//! Configuration: store names and version, precache manifest and
//! classifier allow-lists, loaded from a YAML file.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;
use url::Url;

use crate::classify::ClassifierConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  pub cache: CacheConfig,
  #[serde(deserialize_with = "deserialize_url")]
  pub shell_url: Url,
  /// URLs precached at install time: the shell document plus declared
  /// external assets.
  pub precache_urls: Vec<String>,
  pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Precache name prefix; the version token is appended as `-v<version>`.
  pub precache_name: String,
  pub version: u32,
  pub runtime_name: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      precache_name: "bursst".to_string(),
      version: 1,
      runtime_name: "bursst-runtime".to_string(),
    }
  }
}

impl CacheConfig {
  /// Versioned precache store name. A new version never reuses an old
  /// generation's name.
  pub fn precache_store_name(&self) -> String {
    format!("{}-v{}", self.precache_name, self.version)
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      cache: CacheConfig::default(),
      shell_url: Url::parse("https://bursst.app/index.html").expect("static url"),
      precache_urls: vec![
        "https://bursst.app/".to_string(),
        "https://bursst.app/index.html".to_string(),
        "https://fonts.googleapis.com/css2?family=IBM+Plex+Sans:wght@400;500;600;700&display=swap"
          .to_string(),
        "https://unpkg.com/@phosphor-icons/web".to_string(),
      ],
      classifier: ClassifierConfig::default(),
    }
  }
}

fn deserialize_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let s = String::deserialize(deserializer)?;
  Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./bursst-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/bursst-cache/config.yaml
  ///
  /// With no file found anywhere, built-in defaults apply.
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("bursst-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("bursst-cache").join("config.yaml");
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

  /// Parsed precache manifest. Entries that are not absolute URLs are
  /// logged and skipped.
  pub fn precache_manifest(&self) -> Vec<Url> {
    self
      .precache_urls
      .iter()
      .filter_map(|raw| match Url::parse(raw) {
        Ok(url) => Some(url),
        Err(err) => {
          warn!("skipping invalid precache url {}: {}", raw, err);
          None
        }
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_store_names() {
    let config = Config::default();
    assert_eq!(config.cache.precache_store_name(), "bursst-v1");
    assert_eq!(config.cache.runtime_name, "bursst-runtime");
  }

  #[test]
  fn test_version_changes_precache_name() {
    let cache = CacheConfig {
      version: 2,
      ..CacheConfig::default()
    };
    assert_eq!(cache.precache_store_name(), "bursst-v2");
  }

  #[test]
  fn test_parse_yaml_overrides() {
    let yaml = r#"
cache:
  precache_name: myapp
  version: 3
shell_url: "https://myapp.example/app.html"
precache_urls:
  - "https://myapp.example/app.html"
  - "not a url"
classifier:
  font_hosts:
    - "cdn.example.com"
"#;
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.cache.precache_store_name(), "myapp-v3");
    assert_eq!(config.shell_url.as_str(), "https://myapp.example/app.html");
    assert_eq!(config.precache_manifest().len(), 1);
    assert_eq!(
      config.classifier.font_hosts,
      vec!["cdn.example.com".to_string()]
    );
    // Unlisted sections fall back to defaults
    assert_eq!(config.cache.runtime_name, "bursst-runtime");
  }
}
