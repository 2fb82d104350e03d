//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.
//! Every section and every field is optional; omitted values take the
//! built-in defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::endpoint::EndpointSettings;
use crate::error::ConfigError;
use crate::relay::RelaySettings;

/// Root configuration structure.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Shared command/response directory. Defaults to `<config dir>/mcp_comm`.
    #[serde(default)]
    pub comm_dir: Option<PathBuf>,

    /// Protocol endpoint timing.
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Command relay timing.
    #[serde(default)]
    pub relay: RelayConfig,

    /// How MCP clients reach the endpoint.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let e = &self.endpoint;
        require_positive("endpoint.command_timeout_ms", e.command_timeout_ms)?;
        require_positive("endpoint.poll_interval_ms", e.poll_interval_ms)?;
        require_positive("endpoint.status_stale_ms", e.status_stale_ms)?;
        require_positive("endpoint.check_timeout_ms", e.check_timeout_ms)?;
        if e.command_timeout_ms < e.poll_interval_ms || e.check_timeout_ms < e.poll_interval_ms {
            return Err(invalid(format!(
                "endpoint timeouts must not be shorter than endpoint.poll_interval_ms ({})",
                e.poll_interval_ms
            )));
        }

        let r = &self.relay;
        require_positive("relay.poll_interval_ms", r.poll_interval_ms)?;
        require_positive("relay.heartbeat_interval_ms", r.heartbeat_interval_ms)?;
        require_positive("relay.slow_dispatch_warn_ms", r.slow_dispatch_warn_ms)?;
        require_positive("relay.response_ttl_ms", r.response_ttl_ms)?;

        if self.transport.host.trim().is_empty() {
            return Err(invalid("transport.host must not be empty".to_string()));
        }
        if self.transport.port == 0 {
            return Err(invalid("transport.port must not be 0".to_string()));
        }

        let levels = ["trace", "debug", "info", "warn", "error"];
        if !levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                levels.join(", ")
            )));
        }
        Ok(())
    }

    /// Endpoint timing as runtime settings.
    #[must_use]
    pub const fn endpoint_settings(&self) -> EndpointSettings {
        let e = &self.endpoint;
        EndpointSettings {
            command_timeout: Duration::from_millis(e.command_timeout_ms),
            poll_interval: Duration::from_millis(e.poll_interval_ms),
            status_stale: Duration::from_millis(e.status_stale_ms),
            check_timeout: Duration::from_millis(e.check_timeout_ms),
        }
    }

    /// Relay timing as runtime settings.
    #[must_use]
    pub const fn relay_settings(&self) -> RelaySettings {
        let r = &self.relay;
        RelaySettings {
            poll_interval: Duration::from_millis(r.poll_interval_ms),
            heartbeat_interval: Duration::from_millis(r.heartbeat_interval_ms),
            slow_dispatch_warn: Duration::from_millis(r.slow_dispatch_warn_ms),
            response_ttl: Duration::from_millis(r.response_ttl_ms),
        }
    }
}

fn require_positive(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(invalid(format!("{field} must be greater than 0")));
    }
    Ok(())
}

const fn invalid(message: String) -> ConfigError {
    ConfigError::ValidationError { message }
}

/// Endpoint timing, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    /// Default wait for a response. Default: 15000
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Response polling interval. Default: 100
    #[serde(default = "default_endpoint_poll_ms")]
    pub poll_interval_ms: u64,

    /// Age after which a heartbeat is considered stale. Default: 5000
    #[serde(default = "default_status_stale_ms")]
    pub status_stale_ms: u64,

    /// Timeout for the connection check round-trip. Default: 5000
    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout_ms(),
            poll_interval_ms: default_endpoint_poll_ms(),
            status_stale_ms: default_status_stale_ms(),
            check_timeout_ms: default_check_timeout_ms(),
        }
    }
}

const fn default_command_timeout_ms() -> u64 {
    15_000
}

const fn default_endpoint_poll_ms() -> u64 {
    100
}

const fn default_status_stale_ms() -> u64 {
    5_000
}

const fn default_check_timeout_ms() -> u64 {
    5_000
}

/// Relay timing, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Delay between directory scans. Default: 500
    #[serde(default = "default_relay_poll_ms")]
    pub poll_interval_ms: u64,

    /// Delay between status file refreshes. Default: 1000
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_interval_ms: u64,

    /// Host calls slower than this are logged. Default: 5000
    #[serde(default = "default_slow_dispatch_ms")]
    pub slow_dispatch_warn_ms: u64,

    /// Uncollected responses older than this are deleted. Default: 600000
    #[serde(default = "default_response_ttl_ms")]
    pub response_ttl_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_relay_poll_ms(),
            heartbeat_interval_ms: default_heartbeat_ms(),
            slow_dispatch_warn_ms: default_slow_dispatch_ms(),
            response_ttl_ms: default_response_ttl_ms(),
        }
    }
}

const fn default_relay_poll_ms() -> u64 {
    500
}

const fn default_heartbeat_ms() -> u64 {
    1_000
}

const fn default_slow_dispatch_ms() -> u64 {
    5_000
}

const fn default_response_ttl_ms() -> u64 {
    600_000
}

/// Which transport the MCP server listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Newline-delimited JSON-RPC on stdin/stdout.
    Stdio,
    /// Newline-delimited JSON-RPC over TCP, one session per connection.
    #[default]
    Tcp,
}

/// Transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Default: "tcp"
    #[serde(default)]
    pub mode: TransportMode,

    /// TCP bind address. Default: "127.0.0.1"
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port. Default: 3000
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    3000
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}
