//! # Configuration Management
//!
//! Centralized configuration for the RCON client and the console bridge.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`
//!
//! Durations are written as integer milliseconds.

use crate::core::packet::MAX_PAYLOAD_SIZE;
use crate::error::{ProtocolError, Result};
use crate::protocol::queue::DEFAULT_MAX_IN_FLIGHT;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Conventional RCON port
pub const DEFAULT_PORT: u16 = 25575;

/// Placeholder address used only as a text marker in console output
/// (TEST-NET-1, never routable)
pub const DEFAULT_MARKER_ADDRESS: &str = "192.0.2.0";

/// Largest payload the bridge puts in one response packet
pub const RESPONSE_CHUNK_SIZE: usize = 4096;

/// Console output kept for one response before the rest is discarded
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RconConfig {
    /// Console bridge (server side)
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// RCON client
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RconConfig {
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

    /// Defaults overridden by `RCON_*` environment variables.
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = var("RCON_BRIDGE_ADDRESS") {
            self.bridge.address = addr;
        }

        if let Some(val) = var("RCON_BRIDGE_CONSOLE_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
            self.bridge.console_timeout = Duration::from_millis(val);
        }

        if let Some(val) = var("RCON_CLIENT_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
            self.client.connection_timeout = Duration::from_millis(val);
            self.client.response_timeout = Duration::from_millis(val);
        }

        if let Some(val) = var("RCON_CLIENT_MAX_IN_FLIGHT").and_then(|v| v.parse::<usize>().ok()) {
            self.client.max_in_flight = val;
        }

        if let Some(level) = var("RCON_LOG_LEVEL").and_then(|v| v.parse::<Level>().ok()) {
            self.logging.log_level = level;
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
        errors.extend(self.bridge.validate());
        errors.extend(self.client.validate());
        errors.extend(self.logging.validate());
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

/// Console bridge configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Listen address (e.g., "127.0.0.1:25575")
    pub address: String,

    /// Address used in the `pardon-ip` / `ban-ip` marker lines
    pub marker_address: String,

    /// Deadline for one command routed through the console
    #[serde(with = "duration_serde")]
    pub console_timeout: Duration,

    /// Terminator written after each console line
    pub line_separator: String,

    /// Maximum number of concurrent RCON sessions
    pub max_connections: usize,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Write one `ban-ip` on startup so the first `pardon-ip` has something to undo
    pub prime_console: bool,

    /// Console output bytes collected for one response; the rest is dropped
    pub max_response_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{DEFAULT_PORT}"),
            marker_address: String::from(DEFAULT_MARKER_ADDRESS),
            console_timeout: timeout::CONSOLE_TIMEOUT,
            line_separator: String::from("\n"),
            max_connections: 16,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            prime_console: true,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

impl BridgeConfig {
    /// Validate bridge configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Bridge address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid bridge address format: '{}' (expected format: '0.0.0.0:25575')",
                self.address
            ));
        }

        if self.marker_address.is_empty() {
            errors.push("Marker address cannot be empty".to_string());
        } else if self.marker_address.chars().any(|c| c.is_whitespace() || c == ',') {
            errors.push(format!(
                "Marker address must be a single token: '{}'",
                self.marker_address
            ));
        }

        if self.console_timeout.as_millis() < 10 {
            errors.push("Console timeout too short (minimum: 10ms)".to_string());
        } else if self.console_timeout.as_secs() > 300 {
            errors.push("Console timeout too long (maximum: 300s)".to_string());
        }

        if self.line_separator.is_empty() {
            errors.push("Line separator cannot be empty".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 10_000 {
            errors.push(format!(
                "Max connections very high: {} (the console serializes every command)",
                self.max_connections
            ));
        }

        if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.max_response_bytes < RESPONSE_CHUNK_SIZE {
            errors.push(format!(
                "Max response bytes too small: {} (minimum: {RESPONSE_CHUNK_SIZE})",
                self.max_response_bytes
            ));
        }

        errors
    }
}

/// RCON client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Deadline for TCP connect plus the AUTH round trip
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Default deadline for one command
    #[serde(with = "duration_serde")]
    pub response_timeout: Duration,

    /// Requests allowed on the wire at once
    pub max_in_flight: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_timeout: timeout::CONNECT_TIMEOUT,
            response_timeout: timeout::DEFAULT_TIMEOUT,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.connection_timeout.as_millis() < 10 {
            errors.push("Connection timeout too short (minimum: 10ms)".to_string());
        }

        if self.response_timeout.as_millis() < 10 {
            errors.push("Response timeout too short (minimum: 10ms)".to_string());
        }

        if self.max_in_flight == 0 {
            errors.push("Max in-flight requests must be greater than 0".to_string());
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
            app_name: String::from("rcon-bridge"),
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

// Response chunks must fit in a single packet.
const _: () = assert!(RESPONSE_CHUNK_SIZE <= MAX_PAYLOAD_SIZE);

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
