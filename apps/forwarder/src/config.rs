//! Client configuration
//!
//! `ClientConfig` is what the connection manager runs with. The default relay
//! URL can be persisted in `~/.ntnl/config.json` by `ntnl config --server`.

use crate::reconnect::ReconnectConfig;
use anyhow::{Context, Result, bail};
use ntnl_common::constants::{
    DEFAULT_SERVER_URL, HEARTBEAT_INTERVAL_SECS, REGISTRATION_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Settings persisted between runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedConfig {
    /// Default relay WebSocket URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
}

/// Loads and saves `PersistedConfig`
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    /// Manager for `~/.ntnl/config.json`
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(Self::with_path(home.join(".ntnl").join("config.json")))
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration; a missing file yields the defaults
    pub fn load(&self) -> Result<PersistedConfig> {
        if !self.path.exists() {
            return Ok(PersistedConfig::default());
        }

        let json = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read config file: {:?}", self.path))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse config file: {:?}", self.path))
    }

    pub fn save(&self, config: &PersistedConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write config file: {:?}", self.path))
    }

    /// Persist a new default relay URL after checking it is a WebSocket URL
    pub fn set_server_url(&self, url: &str) -> Result<()> {
        let url = validate_server_url(url)?;
        let mut config = self.load()?;
        config.server_url = Some(url);
        self.save(&config)
    }
}

/// Accept only `ws://` and `wss://` URLs with a host
pub fn validate_server_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url).with_context(|| format!("Invalid server URL: {}", url))?;
    if !matches!(parsed.scheme(), "ws" | "wss") {
        bail!("Server URL must use ws:// or wss://, got {}://", parsed.scheme());
    }
    if parsed.host_str().is_none() {
        bail!("Server URL has no host: {}", url);
    }
    Ok(url.to_string())
}

/// Relay URL to use: explicit flag, then persisted value, then the built-in default
pub fn resolve_server_url(flag: Option<&str>, persisted: &PersistedConfig) -> String {
    flag.map(str::to_string)
        .or_else(|| persisted.server_url.clone())
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string())
}

/// Configuration for one tunnel client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay WebSocket endpoint
    pub server_url: String,

    /// Local origin base URL (e.g. "http://127.0.0.1:3000")
    pub local_address: String,

    /// Local port announced in `register`
    pub port: u16,

    /// Requested subdomain; the relay picks one when absent
    pub subdomain: Option<String>,

    /// Timeout for each call to the local origin
    pub request_timeout: Duration,

    /// Interval between `ping` envelopes
    pub heartbeat_interval: Duration,

    /// How long to wait for `registered` after connecting
    pub registration_timeout: Duration,

    pub reconnect: ReconnectConfig,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, port: u16, subdomain: Option<String>) -> Self {
        Self {
            server_url: server_url.into(),
            local_address: format!("http://127.0.0.1:{}", port),
            port,
            subdomain,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            registration_timeout: Duration::from_secs(REGISTRATION_TIMEOUT_SECS),
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(dir.path().join("config.json"));
        assert_eq!(manager.load().unwrap(), PersistedConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(dir.path().join(".ntnl").join("config.json"));

        manager.set_server_url("wss://relay.example.com").unwrap();
        let config = manager.load().unwrap();
        assert_eq!(config.server_url.as_deref(), Some("wss://relay.example.com"));

        let raw = fs::read_to_string(manager.path()).unwrap();
        assert!(raw.contains(r#""server_url": "wss://relay.example.com""#));
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert!(ConfigManager::with_path(path).load().is_err());
    }

    #[test]
    fn test_validate_server_url() {
        assert!(validate_server_url("ws://localhost:8000").is_ok());
        assert!(validate_server_url("wss://tunnel.ntnl.io").is_ok());
        assert!(validate_server_url("http://tunnel.ntnl.io").is_err());
        assert!(validate_server_url("not a url").is_err());
    }

    #[test]
    fn test_resolve_server_url_precedence() {
        let empty = PersistedConfig::default();
        let saved = PersistedConfig {
            server_url: Some("ws://saved:8000".to_string()),
        };

        assert_eq!(resolve_server_url(None, &empty), DEFAULT_SERVER_URL);
        assert_eq!(resolve_server_url(None, &saved), "ws://saved:8000");
        assert_eq!(resolve_server_url(Some("ws://flag:1"), &saved), "ws://flag:1");
    }

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::new("ws://localhost:8000", 3000, Some("demo".to_string()));
        assert_eq!(config.local_address, "http://127.0.0.1:3000");
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect.max_attempts, 5);
    }
}
