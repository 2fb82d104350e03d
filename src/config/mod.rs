//! Configuration file loading and parsing.
//!
//! This module handles loading the configuration file from disk and parsing
//! it into validated, type-safe structures.
//!
//! # Configuration File Locations
//!
//! 1. Path given as the `CONFIG_FILE` CLI argument (must exist)
//! 2. Default location (optional; built-in defaults apply when absent):
//!    - **Linux/macOS:** `~/.fusion-mcp-bridge/config.json`
//!    - **Windows:** `%USERPROFILE%\.fusion-mcp-bridge\config.json`
//!
//! # Example Configuration
//!
//! ```json
//! {
//!   "comm_dir": "/home/me/.fusion-mcp-bridge/mcp_comm",
//!   "endpoint": { "command_timeout_ms": 15000, "poll_interval_ms": 100 },
//!   "relay": { "poll_interval_ms": 500 },
//!   "transport": { "mode": "tcp", "host": "127.0.0.1", "port": 3000 },
//!   "logging": { "level": "info" }
//! }
//! ```

mod settings;

pub use settings::{
    Config, EndpointConfig, LoggingConfig, RelayConfig, TransportConfig, TransportMode,
};

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Returns the default configuration directory.
///
/// - **Linux/macOS:** `~/.fusion-mcp-bridge/`
/// - **Windows:** `%USERPROFILE%\.fusion-mcp-bridge\`
#[must_use]
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|p| p.join(".fusion-mcp-bridge"))
}

/// Returns the platform-specific default configuration file path.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join("config.json"))
}

/// Name of the shared directory inside the config directory.
const COMM_DIR_NAME: &str = "mcp_comm";

/// Returns the default shared directory, `<config dir>/mcp_comm`.
///
/// Falls back to a directory under the system temp dir when no home
/// directory is known.
#[must_use]
pub fn default_comm_dir() -> PathBuf {
    default_config_dir().map_or_else(
        || std::env::temp_dir().join("fusion-mcp-bridge").join(COMM_DIR_NAME),
        |p| p.join(COMM_DIR_NAME),
    )
}

impl Config {
    /// The shared directory: `comm_dir` if set, else [`default_comm_dir`].
    #[must_use]
    pub fn resolved_comm_dir(&self) -> PathBuf {
        self.comm_dir.clone().unwrap_or_else(default_comm_dir)
    }
}

/// Loads and parses the configuration file.
///
/// If `path` is `None`, uses the platform-specific default location, and a
/// missing default file yields the built-in defaults.
///
/// # Errors
///
/// Returns an error if:
/// - An explicitly given configuration file does not exist
/// - The file cannot be read
/// - The JSON is malformed
/// - A field is invalid
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ConfigError::NotFound {
                    path: p.to_path_buf(),
                });
            }
            p.to_path_buf()
        }
        None => match default_config_path() {
            Some(p) if p.exists() => p,
            _ => return Ok(Config::default()),
        },
    };

    let contents = std::fs::read_to_string(&config_path).map_err(|e| ConfigError::ReadError {
        path: config_path.clone(),
        source: e,
    })?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError {
        path: config_path.clone(),
        source: e,
    })?;

    config.validate()?;

    Ok(config)
}
