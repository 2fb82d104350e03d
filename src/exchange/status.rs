//! Relay heartbeat record.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::message::unix_now;
use crate::catalog;

/// Lifecycle state announced by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    /// The relay is polling for commands.
    Running,
    /// The relay shut down cleanly.
    Stopped,
}

/// Contents of `server_status.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Announced state.
    pub status: RelayState,
    /// When the relay started, in Unix seconds.
    pub started_at_unix: f64,
    /// Last heartbeat, in Unix seconds.
    pub heartbeat_unix: f64,
    /// Last heartbeat as an RFC 3339 timestamp, for humans.
    #[serde(default)]
    pub updated_at: String,
    /// Version string reported by the host application.
    #[serde(default)]
    pub host_version: String,
    /// Tool names the relay serves.
    #[serde(default)]
    pub available_tools: Vec<String>,
    /// Resource URIs the relay serves.
    #[serde(default)]
    pub available_resources: Vec<String>,
    /// Prompt names the relay serves.
    #[serde(default)]
    pub available_prompts: Vec<String>,
}

impl StatusRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn now(status: RelayState, started_at_unix: f64, host_version: impl Into<String>) -> Self {
        Self {
            status,
            started_at_unix,
            heartbeat_unix: unix_now(),
            updated_at: chrono::Utc::now().to_rfc3339(),
            host_version: host_version.into(),
            available_tools: catalog::TOOLS.iter().map(|t| t.name.to_string()).collect(),
            available_resources: catalog::RESOURCES
                .iter()
                .map(|r| r.uri.to_string())
                .collect(),
            available_prompts: catalog::PROMPTS
                .iter()
                .map(|p| p.name.to_string())
                .collect(),
        }
    }

    /// Classifies the record relative to `now_unix`.
    ///
    /// A running relay whose heartbeat is older than `stale_after` is
    /// reported as stale: the host most likely exited without cleaning up.
    #[must_use]
    pub fn classify(&self, now_unix: f64, stale_after: Duration) -> StatusReport {
        match self.status {
            RelayState::Stopped => StatusReport::Stopped,
            RelayState::Running => {
                let age = Duration::try_from_secs_f64((now_unix - self.heartbeat_unix).max(0.0))
                    .unwrap_or(Duration::MAX);
                if age <= stale_after {
                    StatusReport::Running {
                        host_version: self.host_version.clone(),
                    }
                } else {
                    StatusReport::Stale { age }
                }
            }
        }
    }
}

/// What the endpoint concludes about the relay from its status file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
    /// Heartbeat is fresh.
    Running {
        /// Version string reported by the host.
        host_version: String,
    },
    /// The relay announced that it stopped.
    Stopped,
    /// The relay claims to run but the heartbeat is too old.
    Stale {
        /// Age of the last heartbeat.
        age: Duration,
    },
    /// No readable status file.
    Missing,
}

impl StatusReport {
    /// Returns true if commands are expected to be answered.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}
