// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Changes kept per document before the oldest are dropped.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Directory holding one pretty-printed JSON file per document.
    pub data_dir: PathBuf,
    /// Log filter directive (e.g. `info`, `docsync_relay=debug`).
    pub log_filter: String,
    /// Emit logs as JSON lines instead of human-readable text.
    pub log_json: bool,
    /// Per-document change history cap.
    pub history_limit: usize,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `DOCSYNC_RELAY_HOST` | `0.0.0.0` |
    /// | `DOCSYNC_RELAY_PORT` | `8001` |
    /// | `DOCSYNC_RELAY_DATA_DIR` | `saved_files` |
    /// | `DOCSYNC_RELAY_LOG_FILTER` | `info` |
    /// | `DOCSYNC_RELAY_LOG_JSON` | `false` |
    /// | `DOCSYNC_RELAY_HISTORY_LIMIT` | `1000` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    pub fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("DOCSYNC_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("DOCSYNC_RELAY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8001);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let data_dir =
            PathBuf::from(env("DOCSYNC_RELAY_DATA_DIR").unwrap_or_else(|_| "saved_files".into()));

        let log_filter = env("DOCSYNC_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_json = env("DOCSYNC_RELAY_LOG_JSON")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let history_limit = env("DOCSYNC_RELAY_HISTORY_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_HISTORY_LIMIT);

        Self { listen_addr, data_dir, log_filter, log_json, history_limit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| {
            map.get(key)
                .map(|v| v.to_string())
                .ok_or(std::env::VarError::NotPresent)
        }
    }

    #[test]
    fn defaults_when_no_env_vars() {
        let cfg = RelayConfig::from_env_fn(env_from_map(HashMap::new()));
        assert_eq!(cfg.listen_addr.port(), 8001);
        assert_eq!(cfg.listen_addr.ip().to_string(), "0.0.0.0");
        assert_eq!(cfg.data_dir, PathBuf::from("saved_files"));
        assert_eq!(cfg.log_filter, "info");
        assert!(!cfg.log_json);
        assert_eq!(cfg.history_limit, DEFAULT_HISTORY_LIMIT);
    }

    #[test]
    fn custom_host_and_port() {
        let mut m = HashMap::new();
        m.insert("DOCSYNC_RELAY_HOST", "127.0.0.1");
        m.insert("DOCSYNC_RELAY_PORT", "3000");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn invalid_port_uses_default() {
        let mut m = HashMap::new();
        m.insert("DOCSYNC_RELAY_PORT", "not_a_number");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.port(), 8001);
    }

    #[test]
    fn data_dir_and_log_overrides() {
        let mut m = HashMap::new();
        m.insert("DOCSYNC_RELAY_DATA_DIR", "/var/lib/docsync");
        m.insert("DOCSYNC_RELAY_LOG_FILTER", "debug,tower=warn");
        m.insert("DOCSYNC_RELAY_LOG_JSON", "true");
        let cfg = RelayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/docsync"));
        assert_eq!(cfg.log_filter, "debug,tower=warn");
        assert!(cfg.log_json);
    }

    #[test]
    fn zero_or_invalid_history_limit_uses_default() {
        for raw in ["0", "lots"] {
            let mut m = HashMap::new();
            m.insert("DOCSYNC_RELAY_HISTORY_LIMIT", raw);
            let cfg = RelayConfig::from_env_fn(env_from_map(m));
            assert_eq!(cfg.history_limit, DEFAULT_HISTORY_LIMIT);
        }

        let mut m = HashMap::new();
        m.insert("DOCSYNC_RELAY_HISTORY_LIMIT", "25");
        assert_eq!(RelayConfig::from_env_fn(env_from_map(m)).history_limit, 25);
    }
}
