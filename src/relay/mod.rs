//! Command relay running inside the host application.
//!
//! The relay polls the shared directory on a fixed interval. On each tick it
//! refreshes its heartbeat, shows any pending message-box shortcut, and
//! executes every command file that has not been answered yet:
//!
//! 1. Read `command_<id>.json` (undecodable files get a `malformed` failure).
//! 2. Dispatch it through [`HostRequest`] to the [`CadHost`].
//! 3. Write `response_<id>.json` atomically.
//! 4. Remove the command file.
//!
//! A command whose response already exists is skipped, so a command is
//! never executed twice even if removing it failed on an earlier tick.
//!
//! Everything runs on one thread. Host calls block the loop; a call that
//! runs longer than [`RelaySettings::slow_dispatch_warn`] is logged.

mod dispatch;
mod host;
mod simulated;

pub use dispatch::HostRequest;
pub use host::{
    BoxSpec, CadHost, ComponentSummary, DesignStructure, DocumentInfo, HostError,
    OccurrenceSummary, ParameterInfo, StandardPlane, UserParameter,
};
pub use simulated::{Body, Document, Sketch, SimulatedHost, SIMULATED_VERSION};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ChannelError;
use crate::exchange::{
    unix_now, CommDir, Command, CorrelationId, Failure, FailureKind, RelayState, Response,
    StatusRecord,
};

/// Timing knobs for the relay loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    /// Delay between ticks.
    pub poll_interval: Duration,
    /// Minimum delay between status file refreshes.
    pub heartbeat_interval: Duration,
    /// Dispatches slower than this are logged at WARN.
    pub slow_dispatch_warn: Duration,
    /// Responses left uncollected for longer than this are deleted.
    pub response_ttl: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(1),
            slow_dispatch_warn: Duration::from_secs(5),
            response_ttl: Duration::from_secs(600),
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Commands answered on this tick.
    pub processed: usize,
    /// Commands skipped because they were already answered or withdrawn.
    pub skipped: usize,
    /// Commands that could not be handled because of a directory error.
    pub errors: usize,
}

/// The polling command relay.
pub struct Relay<H> {
    dir: CommDir,
    host: H,
    settings: RelaySettings,
    started_at_unix: f64,
    last_heartbeat: Option<Instant>,
}

impl<H: CadHost> Relay<H> {
    /// Creates a relay over `dir` that executes commands against `host`.
    pub fn new(dir: CommDir, host: H, settings: RelaySettings) -> Self {
        Self {
            dir,
            host,
            settings,
            started_at_unix: unix_now(),
            last_heartbeat: None,
        }
    }

    /// The shared directory.
    pub const fn dir(&self) -> &CommDir {
        &self.dir
    }

    /// The host the relay dispatches to.
    pub const fn host(&self) -> &H {
        &self.host
    }

    /// Consumes the relay and returns its host.
    pub fn into_host(self) -> H {
        self.host
    }

    /// Runs one polling pass over the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or listed. Errors
    /// on individual commands are logged and counted instead.
    pub fn tick(&mut self) -> Result<TickSummary, ChannelError> {
        self.dir.ensure()?;

        if self
            .last_heartbeat
            .map_or(true, |at| at.elapsed() >= self.settings.heartbeat_interval)
        {
            self.write_status(RelayState::Running);
            self.sweep_expired_responses();
            self.last_heartbeat = Some(Instant::now());
        }

        self.show_message_box_shortcut();

        let mut summary = TickSummary::default();
        for id in self.dir.pending_commands()? {
            match self.process_command(&id) {
                Ok(true) => summary.processed += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    warn!(id = %id, error = %e, "Failed to handle command file");
                    summary.errors += 1;
                }
            }
        }

        if summary.processed > 0 {
            debug!(
                processed = summary.processed,
                skipped = summary.skipped,
                "Relay tick complete"
            );
        }
        Ok(summary)
    }

    /// Polls until `stop` is set, then marks the relay as stopped.
    pub fn run(&mut self, stop: &AtomicBool) {
        info!(dir = %self.dir.path().display(), "Command relay started");

        while !stop.load(Ordering::Relaxed) {
            if let Err(e) = self.tick() {
                warn!(error = %e, "Relay tick failed");
            }
            std::thread::sleep(self.settings.poll_interval);
        }

        self.write_status(RelayState::Stopped);
        info!("Command relay stopped");
    }

    /// Handles a single command file.
    ///
    /// Returns `Ok(false)` if the command was skipped: it was already
    /// answered, or the endpoint withdrew it before it could be read.
    ///
    /// # Errors
    ///
    /// Returns an error if the command file cannot be read or the response
    /// cannot be written.
    pub fn process_command(&mut self, id: &CorrelationId) -> Result<bool, ChannelError> {
        if self.dir.has_response(id) {
            debug!(id = %id, "Response already written, skipping");
            return Ok(false);
        }

        let outcome = match self.dir.read_command(id) {
            Ok(Some(command)) => {
                if command.id != *id {
                    warn!(
                        id = %id,
                        record_id = %command.id,
                        "Command record id differs from file name"
                    );
                }
                self.dispatch(&command)
            }
            Ok(None) => return Ok(false),
            Err(ChannelError::Decode { source, .. }) => Err(Failure::new(
                FailureKind::Malformed,
                format!("Invalid JSON in command file: {source}"),
            )),
            Err(e) => return Err(e),
        };

        if let Err(failure) = &outcome {
            warn!(id = %id, kind = ?failure.kind, error = %failure, "Command failed");
        }

        self.dir
            .write_response(&Response::from_outcome(id.clone(), outcome))?;
        self.dir.remove(&self.dir.command_path(id))?;
        Ok(true)
    }

    fn dispatch(&mut self, command: &Command) -> Result<Value, Failure> {
        info!(id = %command.id, command = %command.command, "Processing command");

        let started = Instant::now();
        let outcome =
            HostRequest::from_command(command).and_then(|req| req.execute(&mut self.host));

        let elapsed = started.elapsed();
        if elapsed >= self.settings.slow_dispatch_warn {
            warn!(
                id = %command.id,
                command = %command.command,
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "Host call blocked the relay"
            );
        }
        outcome
    }

    fn show_message_box_shortcut(&mut self) {
        let path = self.dir.message_box_path();
        let message = match std::fs::read_to_string(&path) {
            Ok(message) => message,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(error = %e, "Failed to read message box shortcut");
                return;
            }
        };

        if let Err(e) = self.dir.remove(&path) {
            warn!(error = %e, "Failed to remove message box shortcut");
            return;
        }

        let message = message.trim();
        if !message.is_empty() {
            if let Err(e) = self.host.message_box(message) {
                warn!(error = %e, "Message box shortcut failed");
            }
        }
    }

    fn sweep_expired_responses(&self) {
        let expired = match self.dir.expired_responses(self.settings.response_ttl) {
            Ok(expired) => expired,
            Err(e) => {
                warn!(error = %e, "Failed to scan for expired responses");
                return;
            }
        };
        for path in expired {
            match self.dir.remove(&path) {
                Ok(true) => info!(path = %path.display(), "Removed uncollected response"),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Failed to remove uncollected response"),
            }
        }
    }

    fn write_status(&self, state: RelayState) {
        let record = StatusRecord::now(state, self.started_at_unix, self.host.version());
        if let Err(e) = self.dir.write_status(&record) {
            warn!(error = %e, "Failed to write relay status");
        }
    }
}

impl<H: CadHost + Send + 'static> Relay<H> {
    /// Runs the relay loop on a dedicated thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(mut self) -> std::io::Result<RelayHandle<H>> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("command-relay".to_string())
            .spawn(move || {
                self.run(&thread_stop);
                self
            })?;
        Ok(RelayHandle { stop, thread })
    }
}

/// Handle on a relay running on its own thread.
pub struct RelayHandle<H> {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<Relay<H>>,
}

impl<H> RelayHandle<H> {
    /// Asks the relay to stop, waits for it, and returns it.
    ///
    /// # Errors
    ///
    /// Returns the panic payload if the relay thread panicked.
    pub fn stop(self) -> std::thread::Result<Relay<H>> {
        self.stop.store(true, Ordering::Relaxed);
        self.thread.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{CommandName, ResponseStatus};
    use serde_json::{json, Map};
    use tempfile::tempdir;

    fn relay(temp: &tempfile::TempDir) -> Relay<SimulatedHost> {
        Relay::new(
            CommDir::new(temp.path()),
            SimulatedHost::with_design("Test"),
            RelaySettings::default(),
        )
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn tick_answers_and_removes_command() {
        let temp = tempdir().unwrap();
        let mut relay = relay(&temp);
        let command = Command::new(CommandName::CreateBox, params(json!({"name": "Cube"})));
        relay.dir().write_command(&command).unwrap();

        let summary = relay.tick().unwrap();
        assert_eq!(summary.processed, 1);
        assert!(!relay.dir().command_path(&command.id).exists());

        let response = relay.dir().read_response(&command.id).unwrap().unwrap();
        assert_eq!(response.id, command.id);
        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(relay.host().document().unwrap().bodies.len(), 1);
    }

    #[test]
    fn second_tick_does_not_reprocess() {
        let temp = tempdir().unwrap();
        let mut relay = relay(&temp);
        let command = Command::new(CommandName::CreateBox, Map::new());
        relay.dir().write_command(&command).unwrap();

        relay.tick().unwrap();
        let summary = relay.tick().unwrap();
        assert_eq!(summary, TickSummary::default());
        assert_eq!(relay.host().document().unwrap().bodies.len(), 1);
    }

    #[test]
    fn command_with_existing_response_is_skipped() {
        let temp = tempdir().unwrap();
        let mut relay = relay(&temp);
        let command = Command::new(CommandName::CreateBox, Map::new());
        relay.dir().write_command(&command).unwrap();
        relay
            .dir()
            .write_response(&Response::success(command.id.clone(), json!("earlier")))
            .unwrap();

        let summary = relay.tick().unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(relay.host().document().unwrap().bodies.is_empty());
        assert!(relay.dir().command_path(&command.id).exists());
    }

    #[test]
    fn malformed_command_gets_failure_response() {
        let temp = tempdir().unwrap();
        let mut relay = relay(&temp);
        relay.dir().ensure().unwrap();
        let id = CorrelationId::parse("1_garbled").unwrap();
        std::fs::write(relay.dir().command_path(&id), "{\"command\": ").unwrap();

        relay.tick().unwrap();
        let failure = relay
            .dir()
            .read_response(&id)
            .unwrap()
            .unwrap()
            .into_result()
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Malformed);
        assert!(failure.message.starts_with("Invalid JSON"));
        assert!(!relay.dir().command_path(&id).exists());
    }

    #[test]
    fn unknown_command_gets_failure_response() {
        let temp = tempdir().unwrap();
        let mut relay = relay(&temp);
        let command = Command {
            command: "fold_laundry".to_string(),
            ..Command::new(CommandName::ListTools, Map::new())
        };
        relay.dir().ensure().unwrap();
        relay.dir().write_command(&command).unwrap();

        relay.tick().unwrap();
        let failure = relay
            .dir()
            .read_response(&command.id)
            .unwrap()
            .unwrap()
            .into_result()
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::UnknownCommand);
    }

    #[test]
    fn heartbeat_is_written_on_first_tick() {
        let temp = tempdir().unwrap();
        let mut relay = relay(&temp);
        relay.tick().unwrap();

        let status = relay.dir().read_status().unwrap().unwrap();
        assert_eq!(status.status, RelayState::Running);
        assert_eq!(status.host_version, SIMULATED_VERSION);
    }

    #[test]
    fn message_box_shortcut_is_shown_and_removed() {
        let temp = tempdir().unwrap();
        let mut relay = relay(&temp);
        relay.dir().ensure().unwrap();
        std::fs::write(relay.dir().message_box_path(), "  Build finished \n").unwrap();

        relay.tick().unwrap();
        assert_eq!(relay.host().messages(), ["Build finished".to_string()]);
        assert!(!relay.dir().message_box_path().exists());
    }

    #[test]
    fn uncollected_responses_expire() {
        let temp = tempdir().unwrap();
        let settings = RelaySettings {
            response_ttl: Duration::from_millis(1),
            ..RelaySettings::default()
        };
        let mut relay = Relay::new(CommDir::new(temp.path()), SimulatedHost::new(), settings);
        let id = CorrelationId::parse("3_orphan").unwrap();
        relay
            .dir()
            .write_response(&Response::success(id.clone(), json!("late")))
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));

        relay.tick().unwrap();
        assert!(!relay.dir().has_response(&id));
    }

    #[test]
    fn spawned_relay_stops_and_reports_stopped() {
        let temp = tempdir().unwrap();
        let settings = RelaySettings {
            poll_interval: Duration::from_millis(10),
            ..RelaySettings::default()
        };
        let relay = Relay::new(CommDir::new(temp.path()), SimulatedHost::new(), settings);

        let handle = relay.spawn().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let relay = handle.stop().unwrap();

        let status = relay.dir().read_status().unwrap().unwrap();
        assert_eq!(status.status, RelayState::Stopped);
    }
}
