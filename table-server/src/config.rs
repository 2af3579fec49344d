//! Configuration loading for nettable-server.
//!
//! Configuration is loaded from a TOML file (default: `nettable.toml`).

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for nettable-server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Synchronization cadence configuration.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Connection limits configuration.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the TCP listener (default: 0.0.0.0:1735).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Synchronization cadence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Interval between flush ticks for server-local writes, in
    /// milliseconds (default: 100).
    #[serde(default = "default_flush_period_ms")]
    pub flush_period_ms: u64,
}

impl SyncConfig {
    /// The flush period as a [`Duration`].
    pub fn flush_period(&self) -> Duration {
        Duration::from_millis(self.flush_period_ms)
    }
}

/// Connection limits configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Timeout in seconds for receiving the client hello after connection
    /// (default: 10). Connections that stay silent are dropped.
    #[serde(default = "default_hello_timeout_secs")]
    pub hello_timeout_secs: u64,
    /// Maximum message size in bytes (default: 1MB).
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:1735".to_string()
}

fn default_flush_period_ms() -> u64 {
    100
}

fn default_hello_timeout_secs() -> u64 {
    10
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1MB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            flush_period_ms: default_flush_period_ms(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            hello_timeout_secs: default_hello_timeout_secs(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            sync: SyncConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:1735");
        assert_eq!(config.sync.flush_period_ms, 100);
        assert_eq!(config.limits.max_message_size, 1024 * 1024);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:5800"

[sync]
flush_period_ms = 20

[limits]
hello_timeout_secs = 5
max_message_size = 65536
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:5800");
        assert_eq!(config.sync.flush_period(), Duration::from_millis(20));
        assert_eq!(config.limits.hello_timeout_secs, 5);
        assert_eq!(config.limits.max_message_size, 65536);
    }

    #[test]
    fn empty_toml_uses_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:1735");
        assert_eq!(config.limits.hello_timeout_secs, 10);
    }

    #[test]
    fn config_missing_fields_use_defaults() {
        let toml = r#"
[server]
bind_address = "0.0.0.0:2000"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:2000");
        assert_eq!(config.sync.flush_period_ms, 100);
        assert_eq!(config.limits.max_message_size, 1024 * 1024);
    }
}
