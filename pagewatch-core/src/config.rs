//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/pagewatch/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/pagewatch/` (~/.config/pagewatch/)
//! - State/Logs: `$XDG_STATE_HOME/pagewatch/` (~/.local/state/pagewatch/)

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Monitor configuration
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Monitor configuration
///
/// `app_id` and `server_url` are required; everything else has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Application identifier stamped on every record
    #[serde(default)]
    pub app_id: String,

    /// Collection endpoint (e.g., `https://collect.example.com/api/flush`)
    #[serde(default)]
    pub server_url: String,

    /// Queue capacity before the oldest record is evicted
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Milliseconds between periodic flushes
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Log monitor lifecycle and flush activity at info level
    #[serde(default)]
    pub enable_console_log: bool,

    /// Install automatic trackers on init
    #[serde(default = "default_true")]
    pub enable_auto_track: bool,

    /// Flush periodically on a timer
    #[serde(default = "default_true")]
    pub enable_auto_flush: bool,

    /// Report panics as error records (only with auto tracking)
    #[serde(default = "default_true")]
    pub capture_panics: bool,

    /// Initial page URL stamped on records
    #[serde(default)]
    pub page_url: Option<String>,

    /// User agent stamped on records
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            server_url: String::new(),
            max_queue_size: default_max_queue_size(),
            flush_interval_ms: default_flush_interval_ms(),
            timeout_ms: default_timeout_ms(),
            enable_console_log: false,
            enable_auto_track: true,
            enable_auto_flush: true,
            capture_panics: true,
            page_url: None,
            user_agent: None,
        }
    }
}

fn default_max_queue_size() -> usize {
    100
}

fn default_flush_interval_ms() -> u64 {
    10_000
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

impl MonitorConfig {
    /// Create a configuration with the two required fields and defaults
    pub fn new(app_id: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            server_url: server_url.into(),
            ..Default::default()
        }
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.app_id.trim().is_empty() {
            return Err(Error::Config("monitor.app_id is required".to_string()));
        }
        if self.server_url.trim().is_empty() {
            return Err(Error::Config("monitor.server_url is required".to_string()));
        }

        let url = reqwest::Url::parse(&self.server_url)
            .map_err(|e| Error::Config(format!("invalid monitor.server_url: {}", e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::Config(format!(
                "monitor.server_url must be http or https, got {}",
                url.scheme()
            )));
        }

        if self.max_queue_size == 0 {
            return Err(Error::Config(
                "monitor.max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.flush_interval_ms == 0 {
            return Err(Error::Config(
                "monitor.flush_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config(
                "monitor.timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// User agent reported when none is configured
    pub fn user_agent_or_default(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| format!("pagewatch/{}", env!("CARGO_PKG_VERSION")))
    }

    /// Apply a partial update, returning the merged configuration
    pub fn merged(&self, update: &ConfigUpdate) -> Self {
        let mut next = self.clone();
        if let Some(app_id) = &update.app_id {
            next.app_id = app_id.clone();
        }
        if let Some(server_url) = &update.server_url {
            next.server_url = server_url.clone();
        }
        if let Some(size) = update.max_queue_size {
            next.max_queue_size = size;
        }
        if let Some(interval) = update.flush_interval_ms {
            next.flush_interval_ms = interval;
        }
        if let Some(timeout) = update.timeout_ms {
            next.timeout_ms = timeout;
        }
        if let Some(flag) = update.enable_console_log {
            next.enable_console_log = flag;
        }
        if let Some(flag) = update.enable_auto_track {
            next.enable_auto_track = flag;
        }
        if let Some(flag) = update.enable_auto_flush {
            next.enable_auto_flush = flag;
        }
        next
    }
}

/// Partial configuration for `Monitor::update_config`
///
/// `None` fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigUpdate {
    pub app_id: Option<String>,
    pub server_url: Option<String>,
    pub max_queue_size: Option<usize>,
    pub flush_interval_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub enable_console_log: Option<bool>,
    pub enable_auto_track: Option<bool>,
    pub enable_auto_flush: Option<bool>,
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/pagewatch/config.toml` (~/.config/pagewatch/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("pagewatch").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/pagewatch/` (~/.local/state/pagewatch/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("pagewatch")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/pagewatch/pagewatch.log` (~/.local/state/pagewatch/pagewatch.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("pagewatch.log")
    }
}
