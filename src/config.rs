use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

use crate::sync::SyncTag;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin of the application; only requests to this origin are intercepted
  pub origin: String,
  pub generation: GenerationConfig,
  pub routing: RoutingConfig,
  pub max_age: MaxAgeConfig,
  /// URLs pre-warmed into the cache on install
  pub shell: Vec<String>,
  pub sync: SyncConfig,
  pub notifications: NotificationConfig,
  pub network: NetworkConfig,
  /// Where the database and logs live (defaults to $XDG_DATA_HOME/mindcache)
  pub data_dir: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8000".to_string(),
      generation: GenerationConfig::default(),
      routing: RoutingConfig::default(),
      max_age: MaxAgeConfig::default(),
      shell: vec![
        "/".to_string(),
        "/static/favicon.ico".to_string(),
        "/static/manifest.json".to_string(),
      ],
      sync: SyncConfig::default(),
      notifications: NotificationConfig::default(),
      network: NetworkConfig::default(),
      data_dir: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
  pub name: String,
  pub version: String,
}

impl Default for GenerationConfig {
  fn default() -> Self {
    Self {
      name: "mindcache".to_string(),
      version: env!("CARGO_PKG_VERSION").to_string(),
    }
  }
}

/// Path patterns used to classify requests
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
  /// Never intercepted (authentication, payment)
  pub excluded_prefixes: Vec<String>,
  /// Life-safety content that must stay available offline
  pub critical_prefixes: Vec<String>,
  pub static_prefixes: Vec<String>,
  #[serde(deserialize_with = "deserialize_lowercase_vec")]
  pub image_extensions: Vec<String>,
  /// API endpoints whose responses may be cached
  pub api_prefixes: Vec<String>,
}

impl Default for RoutingConfig {
  fn default() -> Self {
    let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    Self {
      excluded_prefixes: strings(&[
        "/accounts/",
        "/auth/",
        "/login/",
        "/logout/",
        "/payment/",
        "/payments/",
        "/billing/",
        "/stripe/",
      ]),
      critical_prefixes: strings(&[
        "/crisis/",
        "/emergency/",
        "/safety-plan/",
        "/api/crisis/",
      ]),
      static_prefixes: strings(&["/static/", "/assets/"]),
      image_extensions: strings(&["png", "jpg", "jpeg", "gif", "svg", "webp", "ico"]),
      api_prefixes: strings(&[
        "/api/dashboard/",
        "/api/wellness/",
        "/api/mood/",
        "/api/journal/",
        "/api/appointments/",
        "/api/resources/",
      ]),
    }
  }
}

fn deserialize_lowercase_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(
    v.into_iter()
      .map(|s| s.trim_start_matches('.').to_lowercase())
      .collect(),
  )
}

/// Per-class max-age policy, in seconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaxAgeConfig {
  pub static_asset: u64,
  pub api_data: u64,
  pub image: u64,
  pub html_page: u64,
  pub critical: u64,
}

impl Default for MaxAgeConfig {
  fn default() -> Self {
    const MINUTE: u64 = 60;
    const DAY: u64 = 24 * 60 * MINUTE;
    Self {
      static_asset: 30 * DAY,
      api_data: 5 * MINUTE,
      image: 7 * DAY,
      html_page: DAY,
      critical: 7 * DAY,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Attempts after which a task is abandoned (kept for inspection, no longer replayed)
  pub max_attempts: u32,
  /// Endpoint overrides per sync tag; unlisted tags use their default endpoint
  pub endpoints: BTreeMap<SyncTag, String>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      endpoints: BTreeMap::new(),
    }
  }
}

impl SyncConfig {
  pub fn endpoint(&self, tag: SyncTag) -> &str {
    self
      .endpoints
      .get(&tag)
      .map(String::as_str)
      .unwrap_or_else(|| tag.default_endpoint())
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub icon: String,
  pub badge: String,
  pub emergency_icon: String,
  pub crisis_path: String,
  pub check_in_path: String,
  pub appointments_path: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      icon: "/static/images/icon-192x192.png".to_string(),
      badge: "/static/images/badge-72x72.png".to_string(),
      emergency_icon: "/static/images/emergency-icon.png".to_string(),
      crisis_path: "/crisis/".to_string(),
      check_in_path: "/wellness/check-in/".to_string(),
      appointments_path: "/appointments/".to_string(),
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
    Self { timeout_secs: 15 }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./mindcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/mindcache/config.yaml
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("mindcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("mindcache").join("config.yaml");
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
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.origin()?;
    Ok(config)
  }

  /// The application origin as a URL.
  pub fn origin(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve the data directory, creating nothing.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("mindcache"))
  }
}
