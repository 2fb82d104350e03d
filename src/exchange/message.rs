//! Command and response records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Maximum accepted length of a correlation identifier.
const MAX_ID_LEN: usize = 128;

/// Returns the current wall-clock time as fractional Unix seconds.
#[must_use]
#[allow(clippy::cast_precision_loss)] // microsecond timestamps fit comfortably in f64
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Token linking a command file to its response file.
///
/// Generated identifiers have the form `<unix-nanos>_<8 hex chars>`, so
/// lexical order of command files roughly follows issue order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let random = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{nanos}_{}", &random[..8]))
    }

    /// Parses an identifier, accepting only `[A-Za-z0-9_-]` up to 128 chars.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let valid = !s.is_empty()
            && s.len() <= MAX_ID_LEN
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        valid.then(|| Self(s.to_string()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CorrelationId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid correlation identifier: {value:?}"))
    }
}

impl From<CorrelationId> for String {
    fn from(id: CorrelationId) -> Self {
        id.0
    }
}

/// Commands the relay knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandName {
    /// Liveness probe answered by the relay itself.
    CheckConnection,
    /// Show a message box in the host.
    MessageBox,
    /// Create a sketch on a construction plane.
    CreateNewSketch,
    /// Create or update a user parameter.
    CreateParameter,
    /// Create a box body by extruding a rectangle.
    CreateBox,
    /// Run a script inside the host.
    ExecuteScript,
    /// List the tools the relay supports.
    ListTools,
    /// List the readable resources.
    ListResources,
    /// List the prompt templates.
    ListPrompts,
    /// Read a resource by URI.
    ReadResource,
    /// Render a prompt template.
    GetPrompt,
}

impl CommandName {
    /// Every known command, in catalog order.
    pub const ALL: [Self; 11] = [
        Self::CheckConnection,
        Self::MessageBox,
        Self::CreateNewSketch,
        Self::CreateParameter,
        Self::CreateBox,
        Self::ExecuteScript,
        Self::ListTools,
        Self::ListResources,
        Self::ListPrompts,
        Self::ReadResource,
        Self::GetPrompt,
    ];

    /// Returns the on-disk name of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CheckConnection => "check_connection",
            Self::MessageBox => "message_box",
            Self::CreateNewSketch => "create_new_sketch",
            Self::CreateParameter => "create_parameter",
            Self::CreateBox => "create_box",
            Self::ExecuteScript => "execute_script",
            Self::ListTools => "list_tools",
            Self::ListResources => "list_resources",
            Self::ListPrompts => "list_prompts",
            Self::ReadResource => "read_resource",
            Self::GetPrompt => "get_prompt",
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command name the relay has no handler for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown command: {0}")]
pub struct UnknownCommandName(pub String);

impl FromStr for CommandName {
    type Err = UnknownCommandName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| UnknownCommandName(s.to_string()))
    }
}

/// A command record, stored as `command_<id>.json`.
///
/// The command name stays a free string on disk so that names unknown to
/// this build still decode and can be answered with a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Correlation identifier.
    pub id: CorrelationId,
    /// Command name.
    pub command: String,
    /// Named arguments.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Creation time in fractional Unix seconds.
    #[serde(default)]
    pub created_at_unix: f64,
}

impl Command {
    /// Creates a command with a fresh correlation identifier.
    #[must_use]
    pub fn new(name: CommandName, params: Map<String, Value>) -> Self {
        Self {
            id: CorrelationId::generate(),
            command: name.as_str().to_string(),
            params,
            created_at_unix: unix_now(),
        }
    }

    /// Resolves the command name.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownCommandName`] if the relay has no handler for it.
    pub fn name(&self) -> Result<CommandName, UnknownCommandName> {
        self.command.parse()
    }
}

/// Outcome flag of a response record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// The command ran and produced a result.
    Success,
    /// The command failed; see the error record.
    Failure,
}

/// Category of a failed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The relay has no handler for the command name.
    UnknownCommand,
    /// The host API raised an error.
    HostApiError,
    /// The command file could not be decoded.
    Malformed,
}

/// Error record carried by a failure response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct Failure {
    /// Failure category.
    pub kind: FailureKind,
    /// Human-readable message.
    pub message: String,
}

impl Failure {
    /// Creates a failure record.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A response record, stored as `response_<id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Correlation identifier of the command this answers.
    pub id: CorrelationId,
    /// Success or failure.
    pub status: ResponseStatus,
    /// Result payload for successful commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error record for failed commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

impl Response {
    /// Creates a success response.
    #[must_use]
    pub const fn success(id: CorrelationId, result: Value) -> Self {
        Self {
            id,
            status: ResponseStatus::Success,
            result: Some(result),
            error: None,
        }
    }

    /// Creates a failure response.
    #[must_use]
    pub const fn failure(id: CorrelationId, failure: Failure) -> Self {
        Self {
            id,
            status: ResponseStatus::Failure,
            result: None,
            error: Some(failure),
        }
    }

    /// Builds a response from a dispatch outcome.
    #[must_use]
    pub fn from_outcome(id: CorrelationId, outcome: Result<Value, Failure>) -> Self {
        match outcome {
            Ok(result) => Self::success(id, result),
            Err(failure) => Self::failure(id, failure),
        }
    }

    /// Converts the response into the payload or the reported failure.
    ///
    /// # Errors
    ///
    /// Returns the [`Failure`] carried by a failure response. A failure
    /// response without an error record is reported as malformed.
    pub fn into_result(self) -> Result<Value, Failure> {
        match self.status {
            ResponseStatus::Success => Ok(self.result.unwrap_or(Value::Null)),
            ResponseStatus::Failure => Err(self.error.unwrap_or_else(|| {
                Failure::new(
                    FailureKind::Malformed,
                    "failure response carried no error record",
                )
            })),
        }
    }
}
