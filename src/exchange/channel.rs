//! The shared directory and its file naming rules.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use super::message::{Command, CorrelationId, Response};
use super::status::StatusRecord;
use crate::error::ChannelError;

/// Heartbeat file written by the relay.
pub const STATUS_FILE: &str = "server_status.json";

/// Plain-text shortcut: its content is shown as a message box.
pub const MESSAGE_BOX_FILE: &str = "message_box.txt";

const COMMAND_PREFIX: &str = "command_";
const RESPONSE_PREFIX: &str = "response_";
const RECORD_SUFFIX: &str = ".json";

/// Handle on the shared command/response directory.
///
/// This is plain configuration: both sides construct one at startup and
/// pass it down explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommDir {
    root: PathBuf,
}

impl CommDir {
    /// Creates a handle for the given directory. Nothing is touched on disk.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Creates the directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn ensure(&self) -> Result<(), ChannelError> {
        std::fs::create_dir_all(&self.root).map_err(|e| ChannelError::io(&self.root, e))
    }

    /// Path of the command file for `id`.
    #[must_use]
    pub fn command_path(&self, id: &CorrelationId) -> PathBuf {
        self.root.join(format!("{COMMAND_PREFIX}{id}{RECORD_SUFFIX}"))
    }

    /// Path of the response file for `id`.
    #[must_use]
    pub fn response_path(&self, id: &CorrelationId) -> PathBuf {
        self.root.join(format!("{RESPONSE_PREFIX}{id}{RECORD_SUFFIX}"))
    }

    /// Path of the relay status file.
    #[must_use]
    pub fn status_path(&self) -> PathBuf {
        self.root.join(STATUS_FILE)
    }

    /// Path of the message-box shortcut file.
    #[must_use]
    pub fn message_box_path(&self) -> PathBuf {
        self.root.join(MESSAGE_BOX_FILE)
    }

    /// Writes a command file atomically. Returns its path.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn write_command(&self, command: &Command) -> Result<PathBuf, ChannelError> {
        let path = self.command_path(&command.id);
        self.write_record(&path, command)?;
        Ok(path)
    }

    /// Writes a response file atomically. Returns its path.
    ///
    /// An existing response with the same identifier is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn write_response(&self, response: &Response) -> Result<PathBuf, ChannelError> {
        let path = self.response_path(&response.id);
        self.write_record(&path, response)?;
        Ok(path)
    }

    /// Writes the relay status file atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn write_status(&self, status: &StatusRecord) -> Result<(), ChannelError> {
        self.write_record(&self.status_path(), status)
    }

    /// Reads the command file for `id`. `Ok(None)` means it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Decode`] for unreadable JSON and
    /// [`ChannelError::Io`] for other failures.
    pub fn read_command(&self, id: &CorrelationId) -> Result<Option<Command>, ChannelError> {
        read_record(&self.command_path(id))
    }

    /// Reads the response file for `id`. `Ok(None)` means it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Decode`] for unreadable JSON and
    /// [`ChannelError::Io`] for other failures.
    pub fn read_response(&self, id: &CorrelationId) -> Result<Option<Response>, ChannelError> {
        read_record(&self.response_path(id))
    }

    /// Reads the relay status file. `Ok(None)` means it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn read_status(&self) -> Result<Option<StatusRecord>, ChannelError> {
        read_record(&self.status_path())
    }

    /// Lists the identifiers of command files in the directory, sorted.
    ///
    /// Files whose names do not carry a valid identifier are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn pending_commands(&self) -> Result<Vec<CorrelationId>, ChannelError> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| ChannelError::io(&self.root, e))?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ChannelError::io(&self.root, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(id) = name
                .strip_prefix(COMMAND_PREFIX)
                .and_then(|rest| rest.strip_suffix(RECORD_SUFFIX))
                .and_then(CorrelationId::parse)
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Lists response files last modified more than `max_age` ago.
    ///
    /// These are answers nobody collected, typically because the endpoint
    /// gave up waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn expired_responses(&self, max_age: Duration) -> Result<Vec<PathBuf>, ChannelError> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| ChannelError::io(&self.root, e))?;

        let mut expired = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ChannelError::io(&self.root, e))?;
            let is_response = entry.file_name().to_str().is_some_and(|name| {
                name.starts_with(RESPONSE_PREFIX) && name.ends_with(RECORD_SUFFIX)
            });
            if !is_response {
                continue;
            }
            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok());
            if age.is_some_and(|age| age > max_age) {
                expired.push(entry.path());
            }
        }
        Ok(expired)
    }

    /// Returns true if a response for `id` is already on disk.
    #[must_use]
    pub fn has_response(&self, id: &CorrelationId) -> bool {
        self.response_path(id).exists()
    }

    /// Removes a file, treating "already gone" as success.
    ///
    /// Returns `true` if this call removed the file.
    ///
    /// # Errors
    ///
    /// Returns an error for failures other than the file being missing.
    pub fn remove(&self, path: &Path) -> Result<bool, ChannelError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ChannelError::io(path, e)),
        }
    }

    /// Best-effort removal of both files of an exchange.
    ///
    /// The command goes first. If it cannot be removed the response stays,
    /// so the relay still sees the command as answered.
    pub fn discard_exchange(&self, id: &CorrelationId) {
        if let Err(e) = self.remove(&self.command_path(id)) {
            tracing::debug!(error = %e, "Could not remove command file");
            return;
        }
        if let Err(e) = self.remove(&self.response_path(id)) {
            tracing::debug!(error = %e, "Could not remove response file");
        }
    }

    /// Serialises `record` to a temporary file in the directory, then renames
    /// it over `path`.
    fn write_record<T: Serialize>(&self, path: &Path, record: &T) -> Result<(), ChannelError> {
        let bytes = serde_json::to_vec_pretty(record).map_err(|e| ChannelError::Encode {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut tmp =
            NamedTempFile::new_in(&self.root).map_err(|e| ChannelError::io(&self.root, e))?;
        tmp.write_all(&bytes)
            .and_then(|()| tmp.flush())
            .map_err(|e| ChannelError::io(tmp.path(), e))?;

        tmp.persist(path).map_err(|e| ChannelError::Persist {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }
}

fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ChannelError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ChannelError::io(path, e)),
    };

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| ChannelError::Decode {
            path: path.to_path_buf(),
            source: e,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{CommandName, Failure, FailureKind};
    use serde_json::{json, Map};
    use tempfile::tempdir;

    fn comm_dir() -> (tempfile::TempDir, CommDir) {
        let temp = tempdir().unwrap();
        let dir = CommDir::new(temp.path().join("mcp_comm"));
        dir.ensure().unwrap();
        (temp, dir)
    }

    #[test]
    fn file_names_follow_convention() {
        let dir = CommDir::new("/tmp/comm");
        let id = CorrelationId::parse("12_abcd").unwrap();
        assert_eq!(
            dir.command_path(&id),
            PathBuf::from("/tmp/comm/command_12_abcd.json")
        );
        assert_eq!(
            dir.response_path(&id),
            PathBuf::from("/tmp/comm/response_12_abcd.json")
        );
        assert_eq!(
            dir.status_path(),
            PathBuf::from("/tmp/comm/server_status.json")
        );
    }

    #[test]
    fn command_write_then_read() {
        let (_temp, dir) = comm_dir();
        let mut params = Map::new();
        params.insert("plane_name".to_string(), json!("XZ"));
        let command = Command::new(CommandName::CreateNewSketch, params);

        let path = dir.write_command(&command).unwrap();
        assert!(path.exists());

        let read = dir.read_command(&command.id).unwrap().unwrap();
        assert_eq!(read, command);
    }

    #[test]
    fn write_leaves_no_temporary_files() {
        let (_temp, dir) = comm_dir();
        let command = Command::new(CommandName::ListTools, Map::new());
        dir.write_command(&command).unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![format!("command_{}.json", command.id)]);
    }

    #[test]
    fn response_write_replaces_existing() {
        let (_temp, dir) = comm_dir();
        let id = CorrelationId::parse("5_dup").unwrap();

        dir.write_response(&Response::success(id.clone(), json!("first")))
            .unwrap();
        dir.write_response(&Response::failure(
            id.clone(),
            Failure::new(FailureKind::HostApiError, "second"),
        ))
        .unwrap();

        let read = dir.read_response(&id).unwrap().unwrap();
        assert_eq!(read.into_result().unwrap_err().message, "second");
    }

    #[test]
    fn missing_files_read_as_none() {
        let (_temp, dir) = comm_dir();
        let id = CorrelationId::parse("9_none").unwrap();
        assert!(dir.read_command(&id).unwrap().is_none());
        assert!(dir.read_response(&id).unwrap().is_none());
        assert!(dir.read_status().unwrap().is_none());
        assert!(!dir.has_response(&id));
    }

    #[test]
    fn garbage_reads_as_decode_error() {
        let (_temp, dir) = comm_dir();
        let id = CorrelationId::parse("9_bad").unwrap();
        std::fs::write(dir.command_path(&id), "{ not json").unwrap();
        assert!(matches!(
            dir.read_command(&id),
            Err(ChannelError::Decode { .. })
        ));
    }

    #[test]
    fn pending_commands_filters_and_sorts() {
        let (_temp, dir) = comm_dir();
        for name in [
            "command_3_c.json",
            "command_1_a.json",
            "response_2_b.json",
            "command_2_b.json.tmp",
            "command_..%2f.json",
            "notes.txt",
            "command_2_b.json",
        ] {
            std::fs::write(dir.path().join(name), "{}").unwrap();
        }

        let ids: Vec<String> = dir
            .pending_commands()
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(ids, vec!["1_a", "2_b", "3_c"]);
    }

    #[test]
    fn expired_responses_respects_age() {
        let (_temp, dir) = comm_dir();
        let id = CorrelationId::parse("4_old").unwrap();
        dir.write_response(&Response::success(id, json!(null))).unwrap();
        std::fs::write(dir.path().join("command_4_old.json"), "{}").unwrap();

        assert!(dir.expired_responses(Duration::from_secs(60)).unwrap().is_empty());

        std::thread::sleep(Duration::from_millis(20));
        let expired = dir.expired_responses(Duration::from_millis(1)).unwrap();
        assert_eq!(expired, vec![dir.path().join("response_4_old.json")]);
    }

    #[test]
    fn remove_reports_whether_file_existed() {
        let (_temp, dir) = comm_dir();
        let path = dir.path().join("command_1_x.json");
        std::fs::write(&path, "{}").unwrap();
        assert!(dir.remove(&path).unwrap());
        assert!(!dir.remove(&path).unwrap());
    }

    #[test]
    fn discard_exchange_removes_both_files() {
        let (_temp, dir) = comm_dir();
        let command = Command::new(CommandName::ListPrompts, Map::new());
        dir.write_command(&command).unwrap();
        dir.write_response(&Response::success(command.id.clone(), json!([])))
            .unwrap();

        dir.discard_exchange(&command.id);
        assert!(!dir.command_path(&command.id).exists());
        assert!(!dir.response_path(&command.id).exists());
        // Second call is a no-op.
        dir.discard_exchange(&command.id);
    }

    #[test]
    fn discard_exchange_keeps_response_while_command_remains() {
        let (_temp, dir) = comm_dir();
        let id = CorrelationId::generate();
        // A directory in place of the command file cannot be removed as a file.
        std::fs::create_dir(dir.command_path(&id)).unwrap();
        dir.write_response(&Response::success(id.clone(), json!("done")))
            .unwrap();

        dir.discard_exchange(&id);
        assert!(dir.command_path(&id).exists());
        assert!(dir.has_response(&id));
    }
}
