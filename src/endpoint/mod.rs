//! Protocol-endpoint side of the exchange.
//!
//! [`Bridge`] turns a command into a file in the shared directory and waits,
//! asynchronously, for the relay's response. Any number of requests may be
//! in flight at once; each one only ever looks at its own correlation
//! identifier.

use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{BridgeError, ChannelError};
use crate::exchange::{unix_now, CommDir, Command, CommandName, CorrelationId, StatusReport};

/// Timing knobs for the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointSettings {
    /// Default time to wait for a response.
    pub command_timeout: Duration,
    /// Delay between checks for the response file.
    pub poll_interval: Duration,
    /// Heartbeats older than this mean the relay is gone.
    pub status_stale: Duration,
    /// Timeout used by [`Bridge::check_connection`].
    pub check_timeout: Duration,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(100),
            status_stale: Duration::from_secs(5),
            check_timeout: Duration::from_secs(5),
        }
    }
}

const NOT_RUNNING: &str = "Fusion 360 add-in does not appear to be running. \
                           Please start Fusion 360 and run the MCPserve add-in.";

/// Sends commands to the relay and waits for the answers.
#[derive(Debug, Clone)]
pub struct Bridge {
    dir: CommDir,
    settings: EndpointSettings,
}

impl Bridge {
    /// Creates a bridge over `dir`.
    #[must_use]
    pub const fn new(dir: CommDir, settings: EndpointSettings) -> Self {
        Self { dir, settings }
    }

    /// The shared directory.
    #[must_use]
    pub const fn dir(&self) -> &CommDir {
        &self.dir
    }

    /// The endpoint settings.
    #[must_use]
    pub const fn settings(&self) -> &EndpointSettings {
        &self.settings
    }

    /// Sends a command using the default timeout.
    ///
    /// # Errors
    ///
    /// See [`Bridge::submit`].
    pub async fn send(
        &self,
        name: CommandName,
        params: Map<String, Value>,
    ) -> Result<Value, BridgeError> {
        self.send_with_timeout(name, params, self.settings.command_timeout)
            .await
    }

    /// Sends a command with an explicit timeout.
    ///
    /// # Errors
    ///
    /// See [`Bridge::submit`].
    pub async fn send_with_timeout(
        &self,
        name: CommandName,
        params: Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        self.submit(Command::new(name, params), timeout).await
    }

    /// Writes `command` and waits up to `timeout` for its response.
    ///
    /// Both files are deleted before this returns, whatever the outcome,
    /// and also when the returned future is dropped early.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Timeout`] if no response arrives in time.
    /// - [`BridgeError::Malformed`] if the response could not be decoded
    ///   before the deadline, or answers a different identifier.
    /// - [`BridgeError::UnknownCommand`] / [`BridgeError::HostApi`] when the
    ///   relay reports a failure.
    /// - [`BridgeError::Channel`] if the directory cannot be used.
    pub async fn submit(&self, command: Command, timeout: Duration) -> Result<Value, BridgeError> {
        let id = command.id.clone();
        self.dir.ensure()?;
        // Also withdraws the command if this future is dropped mid-wait, so
        // a relay that starts later does not run it.
        let _exchange = ExchangeGuard {
            dir: &self.dir,
            id: &id,
        };
        self.dir.write_command(&command)?;
        debug!(id = %id, command = %command.command, "Command written");

        let deadline = Instant::now() + timeout;
        let mut last_decode_error = None;

        loop {
            match self.dir.read_response(&id) {
                Ok(Some(response)) => {
                    if response.id != id {
                        return Err(BridgeError::Malformed(format!(
                            "response file for {id} carries identifier {}",
                            response.id
                        )));
                    }
                    debug!(id = %id, status = ?response.status, "Response received");
                    return response.into_result().map_err(BridgeError::from);
                }
                Ok(None) => {}
                Err(ChannelError::Decode { source, .. }) => {
                    // Possibly caught mid-replace; try again on the next poll.
                    debug!(id = %id, error = %source, "Response not decodable yet");
                    last_decode_error = Some(source.to_string());
                }
                Err(e) => return Err(e.into()),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.settings.poll_interval.min(deadline - now)).await;
        }

        if let Some(detail) = last_decode_error {
            return Err(BridgeError::Malformed(format!(
                "response for '{}' could not be decoded: {detail}",
                command.command
            )));
        }

        warn!(id = %id, command = %command.command, ?timeout, "Command timed out");
        Err(BridgeError::Timeout {
            command: command.command,
            timeout,
        })
    }

    /// Reads the relay's status file.
    #[must_use]
    pub fn relay_status(&self) -> StatusReport {
        match self.dir.read_status() {
            Ok(Some(record)) => record.classify(unix_now(), self.settings.status_stale),
            Ok(None) => StatusReport::Missing,
            Err(e) => {
                debug!(error = %e, "Relay status file is unreadable");
                StatusReport::Missing
            }
        }
    }

    /// Describes whether the relay is reachable, as a sentence for the user.
    ///
    /// Never fails: every outcome is reported in the returned text.
    pub async fn check_connection(&self) -> String {
        match self.relay_status() {
            StatusReport::Running { .. } => {
                match self
                    .send_with_timeout(
                        CommandName::CheckConnection,
                        Map::new(),
                        self.settings.check_timeout,
                    )
                    .await
                {
                    Ok(Value::String(text)) => text,
                    Ok(other) => format!("Fusion 360 add-in is running: {other}"),
                    Err(BridgeError::Timeout { .. }) => {
                        "Fusion 360 add-in status file exists but it is not responding to commands."
                            .to_string()
                    }
                    Err(e) => {
                        format!("Fusion 360 add-in status file exists but got error: {e}")
                    }
                }
            }
            StatusReport::Stale { age } => format!(
                "Fusion 360 add-in stopped sending heartbeats {}s ago. \
                 Restart the MCPserve add-in.",
                age.as_secs()
            ),
            StatusReport::Stopped | StatusReport::Missing => NOT_RUNNING.to_string(),
        }
    }
}

/// Deletes both files of an exchange when dropped.
struct ExchangeGuard<'a> {
    dir: &'a CommDir,
    id: &'a CorrelationId,
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        self.dir.discard_exchange(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{Failure, FailureKind, RelayState, Response, StatusRecord};
    use serde_json::json;
    use tempfile::tempdir;

    fn fast_settings() -> EndpointSettings {
        EndpointSettings {
            command_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(5),
            status_stale: Duration::from_secs(5),
            check_timeout: Duration::from_millis(100),
        }
    }

    /// Answers the first command file that shows up, from a plain thread.
    fn answer_once(dir: CommDir, answer: fn(&Command) -> Response) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while std::time::Instant::now() < deadline {
                if let Some(id) = dir.pending_commands().unwrap().into_iter().next() {
                    let command = dir.read_command(&id).unwrap().unwrap();
                    dir.write_response(&answer(&command)).unwrap();
                    return;
                }
                std::thread::sleep(Duration::from_millis(2));
            }
        })
    }

    #[tokio::test]
    async fn timeout_without_relay_withdraws_command() {
        let temp = tempdir().unwrap();
        let bridge = Bridge::new(CommDir::new(temp.path()), fast_settings());

        let started = Instant::now();
        let err = bridge
            .send(CommandName::MessageBox, Map::new())
            .await
            .unwrap_err();

        assert!(
            matches!(err, BridgeError::Timeout { ref command, .. } if command == "message_box")
        );
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(bridge.dir().pending_commands().unwrap().is_empty());
    }

    #[tokio::test]
    async fn abandoned_send_withdraws_command() {
        let temp = tempdir().unwrap();
        let bridge = Bridge::new(
            CommDir::new(temp.path()),
            EndpointSettings {
                command_timeout: Duration::from_secs(15),
                ..fast_settings()
            },
        );

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            bridge.send(CommandName::CreateBox, Map::new()),
        )
        .await;

        assert!(abandoned.is_err());
        assert!(bridge.dir().pending_commands().unwrap().is_empty());
    }

    #[tokio::test]
    async fn success_returns_result_and_cleans_up() {
        let temp = tempdir().unwrap();
        let dir = CommDir::new(temp.path());
        let bridge = Bridge::new(dir.clone(), fast_settings());
        let responder = answer_once(dir, |c| Response::success(c.id.clone(), json!("done")));

        let result = bridge.send(CommandName::ListTools, Map::new()).await.unwrap();
        responder.join().unwrap();

        assert_eq!(result, json!("done"));
        let leftovers: Vec<_> = std::fs::read_dir(temp.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn relay_failure_is_surfaced() {
        let temp = tempdir().unwrap();
        let dir = CommDir::new(temp.path());
        let bridge = Bridge::new(dir.clone(), fast_settings());
        let responder = answer_once(dir, |c| {
            Response::failure(
                c.id.clone(),
                Failure::new(FailureKind::HostApiError, "No active document"),
            )
        });

        let err = bridge
            .send(CommandName::CreateNewSketch, Map::new())
            .await
            .unwrap_err();
        responder.join().unwrap();

        assert!(matches!(err, BridgeError::HostApi(ref m) if m == "No active document"));
    }

    #[tokio::test]
    async fn undecodable_response_reports_malformed() {
        let temp = tempdir().unwrap();
        let dir = CommDir::new(temp.path());
        let bridge = Bridge::new(dir.clone(), fast_settings());
        let writer = std::thread::spawn(move || {
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while std::time::Instant::now() < deadline {
                if let Some(id) = dir.pending_commands().unwrap().into_iter().next() {
                    std::fs::write(dir.response_path(&id), "{ truncated").unwrap();
                    return;
                }
                std::thread::sleep(Duration::from_millis(2));
            }
        });

        let err = bridge
            .send(CommandName::ListTools, Map::new())
            .await
            .unwrap_err();
        writer.join().unwrap();

        assert!(matches!(err, BridgeError::Malformed(_)));
        assert!(std::fs::read_dir(temp.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn check_connection_without_status_file() {
        let temp = tempdir().unwrap();
        let bridge = Bridge::new(CommDir::new(temp.path()), fast_settings());
        assert_eq!(bridge.relay_status(), StatusReport::Missing);
        assert_eq!(bridge.check_connection().await, NOT_RUNNING);
    }

    #[tokio::test]
    async fn check_connection_with_silent_relay() {
        let temp = tempdir().unwrap();
        let dir = CommDir::new(temp.path());
        dir.write_status(&StatusRecord::now(RelayState::Running, unix_now(), "x"))
            .unwrap();
        let bridge = Bridge::new(dir, fast_settings());

        assert!(bridge.relay_status().is_running());
        let text = bridge.check_connection().await;
        assert!(text.contains("not responding"), "{text}");
    }

    #[tokio::test]
    async fn check_connection_with_stale_heartbeat() {
        let temp = tempdir().unwrap();
        let dir = CommDir::new(temp.path());
        let record = StatusRecord {
            heartbeat_unix: unix_now() - 60.0,
            ..StatusRecord::now(RelayState::Running, unix_now() - 120.0, "x")
        };
        dir.write_status(&record).unwrap();
        let bridge = Bridge::new(dir, fast_settings());

        assert!(matches!(bridge.relay_status(), StatusReport::Stale { .. }));
        assert!(bridge.check_connection().await.contains("stopped sending heartbeats"));
    }
}
