//! # Configuration Management
//!
//! Centralized configuration for the server, its logging and the bundled
//! applications.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment variables via `from_env()`
//! - Direct instantiation with defaults
//!
//! A [`ServerConfig`] is handed to [`Server::new`] once and never mutated
//! afterwards.
//!
//! [`Server::new`]: crate::server::Server::new

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Default max body size accepted by the bundled protocols (16 MB)
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Default outbound queue depth per connection
pub const DEFAULT_SEND_QUEUE_LIMIT: usize = 2000;

/// Default inbound queue depth per connection
pub const DEFAULT_RECEIVE_QUEUE_LIMIT: usize = 2000;

/// Default grace period granted to open connections on shutdown
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default listen address
pub const DEFAULT_ADDRESS: &str = "0.0.0.0:6868";

/// Upper bound for either queue limit
const MAX_QUEUE_LIMIT: usize = 1_000_000;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Image ingest application configuration
    #[serde(default)]
    pub ingest: IngestConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables, on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Override fields from environment variables that are set and parse.
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("FRAME_SERVER_ADDRESS") {
            self.server.address = addr;
        }

        if let Some(val) = env_parse::<usize>("FRAME_SERVER_SEND_QUEUE_LIMIT") {
            self.server.send_queue_limit = val;
        }

        if let Some(val) = env_parse::<usize>("FRAME_SERVER_RECEIVE_QUEUE_LIMIT") {
            self.server.receive_queue_limit = val;
        }

        if let Some(val) = env_parse::<usize>("FRAME_SERVER_MAX_CONNECTIONS") {
            self.server.max_connections = val;
        }

        if let Some(val) = env_parse::<u64>("FRAME_SERVER_SHUTDOWN_TIMEOUT_MS") {
            self.server.shutdown_timeout = Duration::from_millis(val);
        }

        if let Ok(dir) = std::env::var("IMAGES_REPOSITORY") {
            self.ingest.images_dir = Some(PathBuf::from(dir));
        }
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.logging.validate());
        errors.extend(self.ingest.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server listen address (e.g., "0.0.0.0:6868")
    pub address: String,

    /// Outstanding outbound packets per connection before writes are refused
    pub send_queue_limit: usize,

    /// Decoded packets per connection waiting for `on_message`
    pub receive_queue_limit: usize,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Largest body the bundled protocols accept, in bytes
    pub max_packet_size: usize,

    /// Grace period for open connections on shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from(DEFAULT_ADDRESS),
            send_queue_limit: DEFAULT_SEND_QUEUE_LIMIT,
            receive_queue_limit: DEFAULT_RECEIVE_QUEUE_LIMIT,
            max_connections: 1000,
            max_packet_size: MAX_PACKET_SIZE,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:6868')",
                self.address
            ));
        }

        for (name, limit) in [
            ("Send queue limit", self.send_queue_limit),
            ("Receive queue limit", self.receive_queue_limit),
        ] {
            if limit == 0 {
                errors.push(format!("{name} must be greater than 0"));
            } else if limit > MAX_QUEUE_LIMIT {
                errors.push(format!(
                    "{name} too large: {limit} (max recommended: 1,000,000)"
                ));
            }
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.max_packet_size == 0 {
            errors.push("Max packet size cannot be 0".to_string());
        } else if self.max_packet_size > u32::MAX as usize {
            errors.push(format!(
                "Max packet size too large: {} bytes (a 4-byte length field caps it at {})",
                self.max_packet_size,
                u32::MAX
            ));
        }

        if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("frame-server"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Image ingest application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Directory receiving decoded images
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images_dir: Option<PathBuf>,

    /// File extension for stored images
    pub extension: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            images_dir: None,
            extension: String::from("png"),
        }
    }
}

impl IngestConfig {
    /// Validate ingest configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(dir) = &self.images_dir {
            if !dir.is_dir() {
                errors.push(format!(
                    "Images directory does not exist: {}",
                    dir.display()
                ));
            }
        }

        if self.extension.is_empty() || self.extension.contains(['/', '\\', '.']) {
            errors.push(format!("Invalid image extension: '{}'", self.extension));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
