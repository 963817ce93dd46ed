//! Configuration management

use crate::tunnel::DEFAULT_QUEUE_DEPTH;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Tunnel queue sizing
    #[serde(default)]
    pub tunnel: TunnelConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| crate::Error::Config(format!("Failed to write config: {}", e)))
    }
}

/// Queue sizing for a tunnel instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Depth of the shared outbound queue
    pub send_queue: usize,
    /// Depth of each socket's private inbound queue
    pub recv_queue: usize,
    /// Pending connections a listener holds before dropping new sessions
    pub accept_backlog: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            send_queue: DEFAULT_QUEUE_DEPTH,
            recv_queue: DEFAULT_QUEUE_DEPTH,
            accept_backlog: DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.tunnel.send_queue, DEFAULT_QUEUE_DEPTH);
        assert_eq!(config.tunnel.recv_queue, DEFAULT_QUEUE_DEPTH);
        assert_eq!(config.tunnel.accept_backlog, DEFAULT_QUEUE_DEPTH);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = Config::default();
        config.tunnel.recv_queue = 4;

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();

        assert_eq!(parsed.tunnel.recv_queue, 4);
        assert_eq!(parsed.tunnel.send_queue, DEFAULT_QUEUE_DEPTH);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: Config =
            toml::from_str("[logging]\nlevel = \"debug\"\nformat = \"json\"\n").unwrap();
        assert_eq!(parsed.logging.level, "debug");
        assert_eq!(parsed.tunnel.send_queue, DEFAULT_QUEUE_DEPTH);
    }
}
