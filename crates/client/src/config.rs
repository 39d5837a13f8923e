// Client configuration file: `~/.docsync/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::DEFAULT_MAX_RECONNECT_ATTEMPTS;

/// Root directory for docsync client state: `~/.docsync/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".docsync"))
}

/// Path to the client config file: `~/.docsync/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

/// Sync client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Relay WebSocket URL (e.g. `ws://localhost:8001`).
    pub relay_url: String,
    /// Upper bound for opening the socket plus receiving the identity frame.
    pub connect_timeout_ms: u64,
    /// First reconnect delay; doubled on every further failed attempt.
    pub reconnect_base_delay_ms: u64,
    /// Consecutive failures after which automatic reconnects stop.
    pub max_reconnect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:8001".into(),
            connect_timeout_ms: 3_000,
            reconnect_base_delay_ms: 1_000,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ClientConfig {
    /// Load from `~/.docsync/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[source] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("config serialize error: {0}")]
    Serialize(#[source] toml::ser::Error),
}
