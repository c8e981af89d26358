//! relaychat configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coordinator::CoordinatorConfig;
use crate::ipc::{CoordinatorClient, socket_path_for};

/// Main relaychat configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Coordinator settings (also used by peers to find it)
    pub coordinator: CoordinatorConfig,

    /// Peer client settings
    pub peer: PeerConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .relaychat.yml
        let local_config = PathBuf::from(".relaychat.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/relaychat/relaychat.yml
        if let Some(user_config) = user_config_path()
            && user_config.exists()
        {
            match Self::load_from_file(&user_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, before logging is set up
    ///
    /// Errors are swallowed; the full load reports them once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates: Vec<PathBuf> = match config_path {
            Some(path) => vec![path.clone()],
            None => std::iter::once(PathBuf::from(".relaychat.yml"))
                .chain(user_config_path())
                .collect(),
        };

        candidates
            .into_iter()
            .filter(|p| p.exists())
            .find_map(|p| Self::load_from_file(&p).ok())
            .and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Client for the coordinator this config points at
    pub fn coordinator_client(&self) -> Result<CoordinatorClient> {
        let socket_path = socket_path_for(&self.coordinator.name, self.coordinator.socket_dir.as_deref())?;
        Ok(CoordinatorClient::with_socket_path(socket_path)
            .with_timeout(self.peer.request_timeout())
            .with_max_frame_bytes(self.coordinator.max_frame_bytes))
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("relaychat").join("relaychat.yml"))
}

/// Peer client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Request timeout in milliseconds
    #[serde(rename = "request-timeout-ms")]
    pub request_timeout_ms: u64,

    /// Relayed messages buffered before new ones are dropped
    #[serde(rename = "inbound-buffer")]
    pub inbound_buffer: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5000,
            inbound_buffer: 256,
        }
    }
}

impl PeerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.log_level, None);
        assert_eq!(config.coordinator.name, "relay");
        assert_eq!(config.peer.request_timeout_ms, 5000);
        assert_eq!(config.peer.inbound_buffer, 256);
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
log-level: DEBUG

coordinator:
  name: lobby
  socket-dir: /tmp/chat
  delivery-timeout-ms: 500
  max-frame-bytes: 4096
  evict-after-failures: 5

peer:
  request-timeout-ms: 1000
  inbound-buffer: 32
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("DEBUG"));
        assert_eq!(config.coordinator.name, "lobby");
        assert_eq!(config.coordinator.socket_dir, Some(PathBuf::from("/tmp/chat")));
        assert_eq!(config.coordinator.delivery_timeout_ms, 500);
        assert_eq!(config.coordinator.max_frame_bytes, 4096);
        assert_eq!(config.coordinator.evict_after_failures, Some(5));
        assert_eq!(config.peer.request_timeout(), Duration::from_secs(1));
        assert_eq!(config.peer.inbound_buffer, 32);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
coordinator:
  name: lobby
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.coordinator.name, "lobby");

        // Defaults for unspecified
        assert_eq!(config.coordinator.delivery_timeout_ms, 2000);
        assert_eq!(config.coordinator.evict_after_failures, None);
        assert_eq!(config.peer.inbound_buffer, 256);
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("relaychat.yml");
        std::fs::write(&path, "log-level: WARN\ncoordinator:\n  name: test\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.coordinator.name, "test");
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("WARN"));
    }

    #[test]
    fn test_load_explicit_path_missing_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.yml");
        assert!(Config::load(Some(&path)).is_err());
        assert_eq!(Config::load_log_level(Some(&path)), None);
    }

    #[test]
    fn test_coordinator_client_uses_socket_dir() {
        let mut config = Config::default();
        config.coordinator.name = "lobby".to_string();
        config.coordinator.socket_dir = Some(PathBuf::from("/tmp/chat"));

        let client = config.coordinator_client().unwrap();
        assert_eq!(client.socket_path(), Path::new("/tmp/chat/lobby.sock"));
    }
}
