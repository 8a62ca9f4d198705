//! Mailbridge configuration management.
//!
//! Handles the configuration file at:
//! - Linux: ~/.config/mailbridge/config.toml
//! - macOS: ~/Library/Application Support/mailbridge/config.toml
//! - Windows: %APPDATA%\mailbridge\config.toml
//!
//! A missing file means defaults. CLI flags override individual values.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::fs_utils;
use crate::mailbox::{RetireMode, DEFAULT_SIGNAL_FILE};
use crate::server::poller::{Channel, PollerConfig};

const APP_DIR: &str = "mailbridge";

/// Mailbridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Server (poller) settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Client settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Mailbox directories, polled symmetrically. The first one also holds
    /// `server_status.json`.
    #[serde(default = "default_mailboxes")]
    pub mailboxes: Vec<PathBuf>,

    /// Tick length in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// What happens to answered requests
    #[serde(default)]
    pub retire: RetireMode,

    /// Signal file names watched in every mailbox
    #[serde(default = "default_signal_files")]
    pub signal_files: Vec<String>,

    /// Extra ready-beacon locations outside the mailboxes
    #[serde(default)]
    pub beacon_paths: Vec<PathBuf>,

    /// Text written into the ready beacons
    #[serde(default = "default_ready_status")]
    pub ready_status: String,

    /// How long `stop()` waits for the poller thread
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Consecutive all-mailboxes-failed ticks before the poller reports an
    /// error
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_mailboxes() -> Vec<PathBuf> {
    vec![default_mailbox_dir()]
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_signal_files() -> Vec<String> {
    vec![DEFAULT_SIGNAL_FILE.to_string()]
}

fn default_ready_status() -> String {
    "Mailbridge server ready".to_string()
}

fn default_stop_timeout_ms() -> u64 {
    2000
}

fn default_failure_threshold() -> u32 {
    20
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mailboxes: default_mailboxes(),
            poll_interval_ms: default_poll_interval_ms(),
            retire: RetireMode::default(),
            signal_files: default_signal_files(),
            beacon_paths: Vec::new(),
            ready_status: default_ready_status(),
            stop_timeout_ms: default_stop_timeout_ms(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

impl ServerConfig {
    /// Defaults with the given mailboxes
    pub fn with_mailboxes<I, P>(mailboxes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            mailboxes: mailboxes.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Poller settings: the request channel plus one channel per signal file
    pub fn poller_config(&self) -> PollerConfig {
        let mut channels = vec![Channel::Requests];
        channels.extend(self.signal_files.iter().cloned().map(Channel::Signal));
        PollerConfig {
            interval: self.poll_interval(),
            retire: self.retire,
            channels,
            failure_threshold: self.failure_threshold.max(1),
        }
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.mailboxes.is_empty() {
            return Err(BridgeError::Config {
                message: "at least one mailbox directory is required".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(BridgeError::Config {
                message: "poll_interval_ms must be greater than zero".to_string(),
            });
        }
        if let Some(bad) = self
            .signal_files
            .iter()
            .find(|name| name.is_empty() || name.contains(['/', '\\']))
        {
            return Err(BridgeError::Config {
                message: format!("signal file must be a plain file name, got {:?}", bad),
            });
        }
        Ok(())
    }
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Mailbox the client writes requests into
    #[serde(default = "default_mailbox_dir")]
    pub mailbox: PathBuf,

    /// Default wait for a response, in milliseconds
    #[serde(default = "default_client_timeout_ms")]
    pub timeout_ms: u64,

    /// Sleep between response checks, in milliseconds
    #[serde(default = "default_client_poll_ms")]
    pub poll_interval_ms: u64,

    /// Extra ready-beacon locations to probe
    #[serde(default)]
    pub beacon_paths: Vec<PathBuf>,

    /// Leave response files in place after reading them
    #[serde(default)]
    pub keep_responses: bool,
}

fn default_client_timeout_ms() -> u64 {
    10_000
}

fn default_client_poll_ms() -> u64 {
    100
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mailbox: default_mailbox_dir(),
            timeout_ms: default_client_timeout_ms(),
            poll_interval_ms: default_client_poll_ms(),
            beacon_paths: Vec::new(),
            keep_responses: false,
        }
    }
}

impl ClientConfig {
    pub fn for_mailbox(mailbox: impl Into<PathBuf>) -> Self {
        Self {
            mailbox: mailbox.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Default configuration file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("config.toml")
}

/// Default mailbox directory, under the local data directory
pub fn default_mailbox_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("mailbox")
}

impl BridgeConfig {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(&default_config_path())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| BridgeError::transport(path, &e))?;

        toml::from_str(&content).map_err(|e| BridgeError::Config {
            message: format!("Failed to parse {}: {}", path.display(), e),
        })
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&default_config_path())
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| BridgeError::transport(parent, &e))?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| BridgeError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;

        fs_utils::write_atomic(path, content.as_bytes())
            .map_err(|e| BridgeError::transport(path, &e))
    }
}
