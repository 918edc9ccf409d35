//! Core configuration types and loading.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::defaults::*;
use super::links::LinkBlock;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server information.
    pub server: ServerConfig,
    /// Log output configuration.
    #[serde(default)]
    pub log: LogConfig,
    /// Global link settings (timeouts, flood gate, dedup cache).
    #[serde(default)]
    pub s2s: S2SConfig,
    /// Link blocks for server peering.
    #[serde(default)]
    pub links: Vec<LinkBlock>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name (e.g., "irc.straylight.net").
    pub name: String,
    /// Server ID (a digit then 2 alphanumerics, unique on the network).
    pub sid: String,
    /// Server description.
    pub description: String,
    /// Prometheus metrics HTTP port. Disabled when unset.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Log output configuration. Filtering is controlled by `RUST_LOG`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
}

/// Settings shared by every server link.
#[derive(Debug, Clone, Deserialize)]
pub struct S2SConfig {
    /// Address for inbound server links. No listener when unset.
    #[serde(default)]
    pub listen: Option<SocketAddr>,
    /// Seconds a fresh link has to complete PASS/SERVER.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Flood gate sliding window length.
    #[serde(default = "default_flood_window_secs")]
    pub flood_window_secs: u64,
    /// Lines a link may send inside one window before it is dropped.
    #[serde(default = "default_flood_max_lines")]
    pub flood_max_lines: usize,
    /// How long a message id is remembered.
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
    /// Upper bound on remembered message ids.
    #[serde(default = "default_dedup_max_entries")]
    pub dedup_max_entries: usize,
    /// Per-link outbound queue depth.
    #[serde(default = "default_send_queue")]
    pub send_queue: usize,
    /// Delay before redialing a dropped outbound link.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

impl Default for S2SConfig {
    fn default() -> Self {
        Self {
            listen: None,
            handshake_timeout_secs: default_handshake_timeout_secs(),
            flood_window_secs: default_flood_window_secs(),
            flood_max_lines: default_flood_max_lines(),
            dedup_ttl_secs: default_dedup_ttl_secs(),
            dedup_max_entries: default_dedup_max_entries(),
            send_queue: default_send_queue(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

impl S2SConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn flood_window(&self) -> Duration {
        Duration::from_secs(self.flood_window_secs)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkDirection;
    use std::io::Write;

    const SAMPLE: &str = r#"
[server]
name = "hub.test"
sid = "001"
description = "Test hub"

[log]
format = "json"

[s2s]
listen = "127.0.0.1:7000"
flood_max_lines = 50

[[links]]
name = "leaf.test"
sid = "002"
hostname = "127.0.0.1"
port = 7001
password = "secret"
direction = "inbound"
user_sync = false
allowed_ips = ["127.0.0.0/8"]
"#;

    #[test]
    fn s2s_defaults_match_documented_values() {
        let s2s = S2SConfig::default();
        assert_eq!(s2s.handshake_timeout(), Duration::from_secs(15));
        assert_eq!(s2s.flood_window(), Duration::from_secs(10));
        assert_eq!(s2s.flood_max_lines, 200);
        assert_eq!(s2s.dedup_ttl(), Duration::from_secs(120));
        assert!(s2s.listen.is_none());
    }

    #[test]
    fn parses_full_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.server.sid, "001");
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.s2s.flood_max_lines, 50);
        assert_eq!(config.s2s.flood_window_secs, 10);
        assert_eq!(config.links.len(), 1);
        assert_eq!(config.links[0].direction, LinkDirection::Inbound);
        assert!(!config.links[0].user_sync);
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.name, "hub.test");
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load("/nonexistent/slircd-link.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
