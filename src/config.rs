use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::Bucket;
use crate::guard::DEFAULT_GRACE;
use crate::policy::PolicySettings;
use crate::warmer::WarmSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin of the app, e.g. https://trip.example
  pub origin: String,
  /// SQLite cache database (defaults to the user data directory)
  pub cache_path: Option<PathBuf>,
  #[serde(default = "default_payload_marker")]
  pub payload_marker: String,
  /// Same-origin prefixes that are never treated as page navigations
  #[serde(default = "default_excluded_prefixes")]
  pub excluded_prefixes: Vec<String>,
  /// Per-bucket limit overrides, keyed by bucket name
  #[serde(default)]
  pub buckets: BTreeMap<String, BucketConfig>,
  #[serde(default)]
  pub warm: WarmConfig,
  /// Read by library consumers that build a `NavigationGuard`; the CLI has
  /// no navigation surface and ignores it.
  #[serde(default)]
  pub guard: GuardConfig,
  /// Endpoint key -> path, e.g. home-data: /api/home-data
  #[serde(default = "default_endpoints")]
  pub endpoints: BTreeMap<String, String>,
  /// Network timeout for page requests before falling back to cache
  #[serde(default = "default_page_timeout_ms")]
  pub page_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BucketConfig {
  pub max_entries: usize,
  pub max_age_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarmConfig {
  #[serde(default = "default_warm_routes")]
  pub routes: Vec<String>,
  #[serde(default = "default_warm_delay_ms")]
  pub delay_ms: u64,
  #[serde(default = "default_idle_fallback_ms")]
  pub idle_fallback_ms: u64,
}

impl Default for WarmConfig {
  fn default() -> Self {
    Self {
      routes: default_warm_routes(),
      delay_ms: default_warm_delay_ms(),
      idle_fallback_ms: default_idle_fallback_ms(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
  #[serde(default = "default_grace_ms")]
  pub grace_ms: u64,
}

impl Default for GuardConfig {
  fn default() -> Self {
    Self {
      grace_ms: default_grace_ms(),
    }
  }
}

fn default_payload_marker() -> String {
  "_rsc".to_string()
}

fn default_excluded_prefixes() -> Vec<String> {
  PolicySettings::default().excluded_prefixes
}

fn default_endpoints() -> BTreeMap<String, String> {
  [
    ("home-data", "/api/home-data"),
    ("accounting-data", "/api/accounting"),
    ("itinerary-data", "/api/itinerary"),
  ]
  .into_iter()
  .map(|(k, v)| (k.to_string(), v.to_string()))
  .collect()
}

fn default_page_timeout_ms() -> u64 {
  3000
}

fn default_warm_routes() -> Vec<String> {
  WarmSettings::default().routes
}

fn default_warm_delay_ms() -> u64 {
  3000
}

fn default_idle_fallback_ms() -> u64 {
  2000
}

fn default_grace_ms() -> u64 {
  DEFAULT_GRACE.as_millis() as u64
}

fn bucket_max_age(name: &str, bucket: &BucketConfig) -> Result<chrono::Duration> {
  if bucket.max_age_secs <= 0 {
    return Err(eyre!(
      "Bucket {} max_age_secs must be positive, got {}",
      name,
      bucket.max_age_secs
    ));
  }
  chrono::Duration::try_seconds(bucket.max_age_secs)
    .ok_or_else(|| eyre!("Bucket {} max_age_secs is out of range: {}", name, bucket.max_age_secs))
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./lastgood.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/lastgood/config.yaml
  ///
  /// `LASTGOOD_ORIGIN` overrides the origin from the file.
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
      None => match Self::origin_from_env() {
        // No file needed when the origin comes from the environment
        Some(origin) => Self::from_yaml(&format!("origin: {}", origin))?,
        None => {
          return Err(eyre!(
            "No configuration file found. Create one at ~/.config/lastgood/config.yaml\n\
             or set LASTGOOD_ORIGIN."
          ))
        }
      },
    };

    if let Some(origin) = Self::origin_from_env() {
      config.origin = origin;
    }
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("lastgood.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("lastgood").join("config.yaml");
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

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  fn origin_from_env() -> Option<String> {
    std::env::var("LASTGOOD_ORIGIN")
      .ok()
      .filter(|v| !v.trim().is_empty())
  }

  fn validate(&self) -> Result<()> {
    self.origin_url()?;
    for (name, bucket) in &self.buckets {
      if bucket.max_entries == 0 {
        return Err(eyre!("Bucket {} must allow at least one entry", name));
      }
      bucket_max_age(name, bucket)?;
    }
    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    let url =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))?;
    if !matches!(url.scheme(), "http" | "https") {
      return Err(eyre!("Origin must be http or https: {}", self.origin));
    }
    Ok(url)
  }

  pub fn policy_settings(&self) -> Result<PolicySettings> {
    let bucket_overrides = self
      .buckets
      .iter()
      .map(|(name, b)| Ok(Bucket::new(name, b.max_entries, bucket_max_age(name, b)?)))
      .collect::<Result<Vec<_>>>()?;
    Ok(PolicySettings {
      payload_marker: self.payload_marker.clone(),
      excluded_prefixes: self.excluded_prefixes.clone(),
      page_timeout: Duration::from_millis(self.page_timeout_ms),
      bucket_overrides,
    })
  }

  pub fn warm_settings(&self) -> WarmSettings {
    WarmSettings {
      routes: self.warm.routes.clone(),
      delay: Duration::from_millis(self.warm.delay_ms),
      idle_fallback: Duration::from_millis(self.warm.idle_fallback_ms),
      payload_marker: self.payload_marker.clone(),
    }
  }

  /// Grace period for a `NavigationGuard` built from this config.
  pub fn grace(&self) -> Duration {
    Duration::from_millis(self.guard.grace_ms)
  }

  /// Absolute URL for an endpoint key.
  pub fn endpoint_url(&self, key: &str) -> Result<Url> {
    let path = self
      .endpoints
      .get(key)
      .ok_or_else(|| eyre!("Unknown endpoint {}. Known: {:?}", key, self.endpoints.keys()))?;
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid endpoint path {}: {}", path, e))
  }
}
