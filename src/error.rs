//! Error types for fusion-mcp-bridge.
//!
//! Errors raised by the host application itself live in
//! [`crate::relay::HostError`]; the failure record written into response
//! files is [`crate::exchange::Failure`].

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::exchange::{Failure, FailureKind};

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Errors raised while reading or writing files in the shared directory.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// A filesystem operation failed.
    #[error("I/O error on {path}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The temporary file could not be renamed into place.
    #[error("failed to move temporary file into {path}")]
    Persist {
        /// Final destination of the write.
        path: PathBuf,
        /// The underlying persist error.
        #[source]
        source: tempfile::PersistError,
    },

    /// A record could not be decoded from JSON.
    #[error("failed to decode record in {path}")]
    Decode {
        /// File holding the record.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A record could not be encoded as JSON.
    #[error("failed to encode record for {path}")]
    Encode {
        /// Destination of the record.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

impl ChannelError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors surfaced by the protocol endpoint when a command does not succeed.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// No response arrived before the deadline.
    #[error(
        "Fusion 360 did not respond to '{command}' within {}s. Make sure the add-in is running.",
        .timeout.as_secs_f64()
    )]
    Timeout {
        /// Command that was sent.
        command: String,
        /// Deadline that expired.
        timeout: Duration,
    },

    /// The relay has no handler for the command.
    #[error("{0}")]
    UnknownCommand(String),

    /// The host API raised an error while executing the command.
    #[error("{0}")]
    HostApi(String),

    /// A command or response record could not be decoded.
    #[error("malformed record: {0}")]
    Malformed(String),

    /// The shared directory could not be used.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl BridgeError {
    /// Returns the wire-level failure kind, if this error came from the relay.
    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::UnknownCommand(_) => Some(FailureKind::UnknownCommand),
            Self::HostApi(_) => Some(FailureKind::HostApiError),
            Self::Malformed(_) => Some(FailureKind::Malformed),
            Self::Timeout { .. } | Self::Channel(_) => None,
        }
    }
}

impl From<Failure> for BridgeError {
    fn from(failure: Failure) -> Self {
        match failure.kind {
            FailureKind::UnknownCommand => Self::UnknownCommand(failure.message),
            FailureKind::HostApiError => Self::HostApi(failure.message),
            FailureKind::Malformed => Self::Malformed(failure.message),
        }
    }
}
