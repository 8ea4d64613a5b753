use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub jira: JiraConfig,
  /// Identifier scoping mappings, preferences and cache keys to one
  /// workspace. Single-instance deployments can leave the default.
  #[serde(default = "default_workspace_id")]
  pub workspace_id: String,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub dynamic_channels: DynamicChannelsConfig,
  #[serde(default)]
  pub http: HttpConfig,
  #[serde(default)]
  pub notify: NotifyConfig,
  #[serde(default)]
  pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JiraConfig {
  pub url: String,
  pub user: String,
  /// VCS application type reported by the dev-status API ("github",
  /// "bitbucket", "stash", ...)
  #[serde(default = "default_vcs_type")]
  pub vcs_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Gate for cache-aside reads. Disabled caches still accept writes from
  /// management commands but every lookup goes to the backing store.
  #[serde(default)]
  pub enabled: bool,
  /// Default entry lifetime in seconds. 0 means entries never expire
  /// unless a caller sets an explicit TTL.
  #[serde(default = "default_ttl_seconds")]
  pub default_ttl_seconds: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      default_ttl_seconds: default_ttl_seconds(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DynamicChannelsConfig {
  /// Gate for repository-derived channel discovery.
  #[serde(default = "default_true")]
  pub enabled: bool,
}

impl Default for DynamicChannelsConfig {
  fn default() -> Self {
    Self { enabled: true }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
  #[serde(default = "default_listen")]
  pub listen: String,
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self {
      listen: default_listen(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifyConfig {
  /// Chat gateway that receives serialized notifications. When unset,
  /// notifications are logged instead of delivered.
  pub gateway_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
  /// Path to the SQLite database. Defaults to the platform data directory.
  pub path: Option<PathBuf>,
}

fn default_workspace_id() -> String {
  "default".to_string()
}

fn default_vcs_type() -> String {
  "github".to_string()
}

fn default_ttl_seconds() -> u64 {
  3600
}

fn default_true() -> bool {
  true
}

fn default_listen() -> String {
  "0.0.0.0:8080".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./jira-relay.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/jira-relay/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/jira-relay/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("jira-relay.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("jira-relay").join("config.yaml");
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

  /// Get the Jira API token from environment variables.
  ///
  /// Checks JIRA_RELAY_TOKEN first, then JIRA_API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("JIRA_RELAY_TOKEN")
      .or_else(|_| std::env::var("JIRA_API_TOKEN"))
      .map_err(|_| {
        eyre!(
          "Jira API token not found. Set JIRA_RELAY_TOKEN or JIRA_API_TOKEN environment variable."
        )
      })
  }

  /// Admin key guarding the cache purge endpoint. When unset the endpoint
  /// denies every request.
  pub fn admin_api_key() -> Option<String> {
    std::env::var("JIRA_RELAY_API_KEY").ok()
  }
}
