use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::conflict::Resolution;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  /// Project URL, e.g. https://xyz.supabase.co
  pub url: String,
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// How long a loaded dataset is served from the cache
  #[serde(default = "default_cache_max_age_secs")]
  pub cache_max_age_secs: u64,
  /// Realtime events this soon after our own write are treated as echoes
  #[serde(default = "default_echo_window_ms")]
  pub echo_window_ms: u64,
  /// Quiet period before a burst of realtime events triggers a reload
  #[serde(default = "default_debounce_ms")]
  pub debounce_ms: u64,
  #[serde(default = "default_heartbeat_secs")]
  pub heartbeat_secs: u64,
  /// Answer given to overwrite prompts when running non-interactively
  #[serde(default)]
  pub conflict_resolution: Resolution,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      cache_max_age_secs: default_cache_max_age_secs(),
      echo_window_ms: default_echo_window_ms(),
      debounce_ms: default_debounce_ms(),
      heartbeat_secs: default_heartbeat_secs(),
      conflict_resolution: Resolution::default(),
    }
  }
}

impl SyncConfig {
  pub fn cache_max_age(&self) -> Duration {
    Duration::from_secs(self.cache_max_age_secs)
  }

  pub fn echo_window(&self) -> Duration {
    Duration::from_millis(self.echo_window_ms)
  }

  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.debounce_ms)
  }

  pub fn heartbeat(&self) -> Duration {
    Duration::from_secs(self.heartbeat_secs)
  }
}

fn default_request_timeout_secs() -> u64 {
  30
}

fn default_cache_max_age_secs() -> u64 {
  5 * 60
}

fn default_echo_window_ms() -> u64 {
  2000
}

fn default_debounce_ms() -> u64 {
  1000
}

fn default_heartbeat_secs() -> u64 {
  30
}

/// API credentials, read from the environment rather than the config file.
#[derive(Debug, Clone)]
pub struct Credentials {
  pub anon_key: String,
  /// Signed-in user's access token; requests fall back to the anon key
  pub access_token: Option<String>,
}

impl Credentials {
  /// Token sent as the bearer credential.
  pub fn bearer(&self) -> &str {
    self.access_token.as_deref().unwrap_or(&self.anon_key)
  }

  /// Read credentials from environment variables.
  ///
  /// The anon key comes from TMS_SYNC_ANON_KEY, falling back to
  /// SUPABASE_ANON_KEY. TMS_SYNC_ACCESS_TOKEN is optional.
  pub fn from_env() -> Result<Self> {
    let anon_key = std::env::var("TMS_SYNC_ANON_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .map_err(|_| {
        eyre!("Backend API key not found. Set TMS_SYNC_ANON_KEY or SUPABASE_ANON_KEY.")
      })?;
    let access_token = std::env::var("TMS_SYNC_ACCESS_TOKEN").ok();

    Ok(Self {
      anon_key,
      access_token,
    })
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tms-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tms-sync/config.yaml
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
        "No configuration file found. Create one at ~/.config/tms-sync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Working directory first, so a project can pin its own backend
    let local = PathBuf::from("tms-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Then the per-user config directory
    let xdg_path = dirs::config_dir()?.join("tms-sync").join("config.yaml");
    xdg_path.exists().then_some(xdg_path)
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;

    Self::parse(&contents).wrap_err_with(|| format!("Invalid config file {}", path.display()))
  }

  /// Parse and validate a YAML config document.
  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.sync.validate()?;
    Ok(config)
  }
}

impl SyncConfig {
  /// Reject settings the realtime loop cannot run with.
  pub fn validate(&self) -> Result<()> {
    if self.heartbeat_secs == 0 {
      return Err(eyre!("sync.heartbeat_secs must be at least 1"));
    }
    Ok(())
  }
}
