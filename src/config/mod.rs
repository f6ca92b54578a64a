//! Configuration module for uabrowser
//!
//! This module handles:
//! - Application configuration (endpoint, client timeouts, worker pool, logging)
//! - Application state persistence (recent endpoints, last selected node)
//!
//! # App Data Location
//!
//! Application data is stored in the platform-appropriate location:
//! - **Linux**: `~/.local/share/io.uabrowser/`
//! - **macOS**: `~/Library/Application Support/io.uabrowser/`
//! - **Windows**: `%APPDATA%\io.uabrowser\`
//!
//! # Files
//!
//! - `config.toml` - [`AppConfig`], edited by hand
//! - `app_state.json` - [`AppState`], written by the application
//!
//! # Example
//!
//! ```ignore
//! use uabrowser::config::{AppConfig, AppState};
//!
//! let config = AppConfig::load_or_default(AppConfig::default_path()?);
//! let mut state = AppState::load_or_default();
//! state.add_recent_address(&config.client.endpoint);
//! state.save()?;
//! ```

use crate::error::{Result, UaBrowserError};
use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "io.uabrowser";

/// App state filename
pub const APP_STATE_FILE: &str = "app_state.json";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Maximum number of endpoint addresses to remember
pub const MAX_RECENT_ADDRESSES: usize = 10;

/// Endpoint used when nothing else is configured
pub const DEFAULT_ENDPOINT: &str = "opc.tcp://localhost:4840";

/// Default log filter
pub const DEFAULT_LOG_FILTER: &str = "info,uabrowser=debug";

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        UaBrowserError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            UaBrowserError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Get the path to the app state file
pub fn app_state_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(APP_STATE_FILE))
}

// ==================== App State ====================

/// Persistent application state
///
/// History the user builds up across sessions: the endpoint address list
/// offered on connect and the node that was selected when the last session
/// ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    /// Version for future migration support
    #[serde(default = "default_app_state_version")]
    pub version: u32,

    /// Endpoint addresses, most recent first
    #[serde(default)]
    pub recent_addresses: Vec<String>,

    /// Node selected when the last session ended
    #[serde(default)]
    pub last_node: Option<NodeId>,
}

fn default_app_state_version() -> u32 {
    1
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            version: 1,
            recent_addresses: Vec::new(),
            last_node: None,
        }
    }
}

impl AppState {
    /// Load app state from the default location
    pub fn load() -> Result<Self> {
        let path = app_state_path().ok_or_else(|| {
            UaBrowserError::Config("Could not determine app state path".to_string())
        })?;
        Self::load_from(path)
    }

    /// Load app state from an explicit path; a missing file gives defaults
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| UaBrowserError::Config(format!("Failed to read app state: {}", e)))?;

        serde_json::from_str(&content)
            .map_err(|e| UaBrowserError::Serialization(format!("Failed to parse app state: {}", e)))
    }

    /// Load app state, returning defaults on any error
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!("Failed to load app state, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save app state to the default location
    pub fn save(&self) -> Result<()> {
        let dir = ensure_app_data_dir()?;
        self.save_to(dir.join(APP_STATE_FILE))
    }

    /// Save app state to an explicit path
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                UaBrowserError::Config(format!("Failed to create state directory: {}", e))
            })?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| UaBrowserError::Serialization(format!("Failed to serialize app state: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| UaBrowserError::Config(format!("Failed to write app state: {}", e)))
    }

    /// Put an address at the front of the history
    pub fn add_recent_address(&mut self, address: &str) {
        let address = address.trim();
        if address.is_empty() {
            return;
        }
        self.recent_addresses.retain(|a| a != address);
        self.recent_addresses.insert(0, address.to_string());
        self.recent_addresses.truncate(MAX_RECENT_ADDRESSES);
    }

    pub fn remove_recent_address(&mut self, address: &str) {
        self.recent_addresses.retain(|a| a != address);
    }

    /// Most recently used address, if any
    pub fn last_address(&self) -> Option<&str> {
        self.recent_addresses.first().map(|s| s.as_str())
    }
}

// ==================== App Config ====================

/// Application configuration, stored as TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub workers: WorkerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Default config path in the app data directory
    pub fn default_path() -> Result<PathBuf> {
        app_data_dir()
            .map(|p| p.join(CONFIG_FILE))
            .ok_or_else(|| UaBrowserError::Config("Could not determine config path".to_string()))
    }

    /// Load a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            UaBrowserError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            UaBrowserError::Serialization(format!("Failed to parse config file {:?}: {}", path, e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save config as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                UaBrowserError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| UaBrowserError::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            UaBrowserError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Reject values the session cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workers.threads == 0 {
            return Err(UaBrowserError::Config("workers.threads must be at least 1".into()));
        }
        if self.workers.ui_event_buffer == 0 {
            return Err(UaBrowserError::Config("workers.ui_event_buffer must be at least 1".into()));
        }
        if self.client.endpoint.trim().is_empty() {
            return Err(UaBrowserError::Config("client.endpoint is empty".into()));
        }
        Ok(())
    }
}

// ==================== Client Config ====================

/// Protocol client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Endpoint URL to connect to
    pub endpoint: String,

    /// Timeout for a single service call in milliseconds
    pub request_timeout_ms: u64,

    /// Session timeout requested from the server in milliseconds
    pub session_timeout_ms: u64,

    /// Publishing interval of the data-change subscription in milliseconds
    pub publishing_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout_ms: 5_000,
            session_timeout_ms: 60_000,
            publishing_interval_ms: 500,
        }
    }
}

// ==================== Worker Config ====================

/// Background worker pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of worker threads running subscription walks
    pub threads: usize,

    /// Capacity of the UI event channel
    pub ui_event_buffer: usize,

    /// Capacity of each per-node notification channel
    pub signal_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            ui_event_buffer: 1024,
            signal_capacity: crate::tree::DEFAULT_SIGNAL_CAPACITY,
        }
    }
}

// ==================== Logging Config ====================

/// Logging settings, read by the binary before anything else
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,

    /// Also write logs to this file
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            log_file: None,
        }
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_app_state_default() {
        let state = AppState::default();
        assert!(state.recent_addresses.is_empty());
        assert!(state.last_node.is_none());
        assert_eq!(state.version, 1);
    }

    #[test]
    fn test_add_recent_address() {
        let mut state = AppState::default();

        state.add_recent_address("opc.tcp://a:4840");
        state.add_recent_address("opc.tcp://b:4840");
        assert_eq!(state.last_address(), Some("opc.tcp://b:4840"));

        // Same address again moves it to the front instead of duplicating
        state.add_recent_address("opc.tcp://a:4840");
        assert_eq!(state.recent_addresses, vec!["opc.tcp://a:4840", "opc.tcp://b:4840"]);

        state.add_recent_address("   ");
        assert_eq!(state.recent_addresses.len(), 2);
    }

    #[test]
    fn test_recent_addresses_max_limit() {
        let mut state = AppState::default();
        for i in 0..15 {
            state.add_recent_address(&format!("opc.tcp://host{}:4840", i));
        }
        assert_eq!(state.recent_addresses.len(), MAX_RECENT_ADDRESSES);
        assert_eq!(state.last_address(), Some("opc.tcp://host14:4840"));
    }

    #[test]
    fn test_app_state_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(APP_STATE_FILE);

        let mut state = AppState::default();
        state.add_recent_address("opc.tcp://plc:4840");
        state.last_node = Some(NodeId::new("ns=2;s=Line1.Speed"));
        state.save_to(&path).unwrap();

        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"ns=2;s=Line1.Speed\""));
        assert_eq!(AppState::load_from(&path).unwrap(), state);
    }

    #[test]
    fn test_app_state_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let state = AppState::load_from(dir.path().join("absent.json")).unwrap();
        assert_eq!(state, AppState::default());
    }

    #[test]
    fn test_app_state_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(APP_STATE_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppState::load_from(&path), Err(UaBrowserError::Serialization(_))));
    }

    #[test]
    fn test_app_config_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut config = AppConfig::default();
        config.client.endpoint = "opc.tcp://plc:4840".into();
        config.workers.threads = 2;
        config.logging.log_file = Some(dir.path().join("uabrowser.log"));
        config.save(&path).unwrap();

        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_app_config_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[client]\nendpoint = \"opc.tcp://plc:4840\"\n").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.client.endpoint, "opc.tcp://plc:4840");
        assert_eq!(config.client.request_timeout_ms, 5_000);
        assert_eq!(config.workers, WorkerConfig::default());
        assert_eq!(config.logging.filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_app_config_rejects_zero_threads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[workers]\nthreads = 0\n").unwrap();

        assert!(AppConfig::load(&path).is_err());
        assert_eq!(AppConfig::load_or_default(&path), AppConfig::default());
    }
}
