//! MCP tool definitions and their mapping onto relay commands.
//!
//! Every tool except `check_connection` is a straight forward of its
//! arguments to the relay command of the same name. `check_connection`
//! looks at the relay status file first, then pings the relay.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::catalog;
use crate::endpoint::Bridge;
use crate::exchange::CommandName;

/// Upper bound for the `timeout_seconds` argument of `execute_script`.
pub const MAX_SCRIPT_TIMEOUT: Duration = Duration::from_secs(600);

/// A tool definition for the tools/list response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
}

/// Parameters for the tools/call request.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: Option<Map<String, Value>>,
}

/// Content item in a tool call response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
}

/// Result of a tool call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content returned by the tool.
    pub content: Vec<ToolContent>,
    /// Whether the tool call resulted in an error.
    #[serde(skip_serializing_if = "is_false")]
    pub is_error: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // required signature for skip_serializing_if
const fn is_false(b: &bool) -> bool {
    !*b
}

impl ToolCallResult {
    /// Creates a successful text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Creates an error text result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// The text of the first content item.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.content.first().map(|c| match c {
            ToolContent::Text { text } => text.as_str(),
        })
    }
}

fn input_schema(name: &str) -> Value {
    match name {
        "message_box" => json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message text to display"
                }
            },
            "required": ["message"]
        }),
        "create_new_sketch" => json!({
            "type": "object",
            "properties": {
                "plane_name": {
                    "type": "string",
                    "description": "Standard plane (\"XY\", \"YZ\", \"XZ\") or the name of a construction plane"
                }
            },
            "required": ["plane_name"]
        }),
        "create_parameter" => json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Parameter name, e.g. \"Width\"" },
                "expression": { "type": "string", "description": "Value expression, e.g. \"10\" or \"Width * 2\"" },
                "unit": { "type": "string", "description": "Unit, e.g. \"mm\", \"in\", \"deg\"" },
                "comment": { "type": "string", "description": "Optional description of the parameter" }
            },
            "required": ["name", "expression", "unit"]
        }),
        "create_box" => json!({
            "type": "object",
            "properties": {
                "length": { "type": "number", "description": "Length in mm (X direction)" },
                "width": { "type": "number", "description": "Width in mm (Y direction)" },
                "height": { "type": "number", "description": "Height in mm (Z direction)" },
                "name": { "type": "string", "description": "Body name (default: \"Box\")" }
            },
            "required": ["length", "width", "height"]
        }),
        "execute_script" => json!({
            "type": "object",
            "properties": {
                "script": {
                    "type": "string",
                    "description": "Script to run inside Fusion 360. Set a variable called `result` to return output."
                },
                "timeout_seconds": {
                    "type": "number",
                    "description": "How long to wait for the script to finish (default: the configured command timeout)"
                }
            },
            "required": ["script"]
        }),
        _ => json!({ "type": "object", "properties": {} }),
    }
}

/// Returns the definitions served by tools/list, in catalog order.
#[must_use]
pub fn definitions() -> Vec<ToolDefinition> {
    catalog::TOOLS
        .iter()
        .map(|t| ToolDefinition {
            name: t.name.to_string(),
            description: t.description.to_string(),
            input_schema: input_schema(t.name),
        })
        .collect()
}

/// Runs a tool. Every failure is reported inside the result.
pub async fn call(bridge: &Bridge, params: ToolCallParams) -> ToolCallResult {
    let mut arguments = params.arguments.unwrap_or_default();

    if catalog::tool(&params.name).is_none() {
        return ToolCallResult::error(format!("Unknown tool: {}", params.name));
    }
    let name = match params.name.parse::<CommandName>() {
        Ok(name) => name,
        Err(e) => return ToolCallResult::error(e.to_string()),
    };

    if name == CommandName::CheckConnection {
        return ToolCallResult::text(bridge.check_connection().await);
    }

    let timeout = match name {
        CommandName::ExecuteScript => match arguments.remove("timeout_seconds") {
            None | Some(Value::Null) => bridge.settings().command_timeout,
            Some(value) => match script_timeout(&value) {
                Ok(timeout) => timeout,
                Err(message) => return ToolCallResult::error(message),
            },
        },
        _ => bridge.settings().command_timeout,
    };

    tracing::debug!(tool = %name, ?timeout, "Forwarding tool call to relay");

    match bridge.send_with_timeout(name, arguments, timeout).await {
        Ok(value) => ToolCallResult::text(render_value(value)),
        Err(e) => {
            tracing::debug!(tool = %name, kind = ?e.failure_kind(), error = %e, "Tool call failed");
            ToolCallResult::error(e.to_string())
        }
    }
}

/// Parses `timeout_seconds`, clamped to [`MAX_SCRIPT_TIMEOUT`].
fn script_timeout(value: &Value) -> Result<Duration, String> {
    let seconds = value
        .as_f64()
        .filter(|s| s.is_finite() && *s > 0.0)
        .ok_or_else(|| {
            format!("Invalid timeout_seconds: expected a positive number, got {value}")
        })?;
    Ok(Duration::try_from_secs_f64(seconds)
        .unwrap_or(MAX_SCRIPT_TIMEOUT)
        .min(MAX_SCRIPT_TIMEOUT))
}

/// Strings are passed through; anything else is pretty-printed JSON.
pub(crate) fn render_value(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointSettings;
    use crate::exchange::CommDir;
    use tempfile::tempdir;

    fn quick_bridge(dir: &std::path::Path) -> Bridge {
        Bridge::new(
            CommDir::new(dir),
            EndpointSettings {
                command_timeout: Duration::from_millis(50),
                poll_interval: Duration::from_millis(5),
                status_stale: Duration::from_secs(5),
                check_timeout: Duration::from_millis(50),
            },
        )
    }

    #[test]
    fn definitions_follow_catalog() {
        let defs = definitions();
        assert_eq!(defs.len(), catalog::TOOLS.len());
        assert_eq!(defs[0].name, "check_connection");

        for def in &defs {
            assert!(def.input_schema.is_object());
            assert_eq!(def.input_schema["type"], "object");
        }

        let script = defs.iter().find(|d| d.name == "execute_script").unwrap();
        assert!(script.input_schema["properties"]["timeout_seconds"].is_object());

        let value = serde_json::to_value(&defs[1]).unwrap();
        assert!(value.get("inputSchema").is_some());
    }

    #[test]
    fn script_timeout_is_validated_and_clamped() {
        assert_eq!(script_timeout(&json!(2.5)), Ok(Duration::from_millis(2500)));
        assert_eq!(script_timeout(&json!(1e9)), Ok(MAX_SCRIPT_TIMEOUT));
        assert!(script_timeout(&json!(0)).is_err());
        assert!(script_timeout(&json!(-3)).is_err());
        assert!(script_timeout(&json!("soon")).is_err());
    }

    #[test]
    fn values_render_as_text() {
        assert_eq!(render_value(json!("plain")), "plain");
        assert_eq!(render_value(json!({"a": 1})), "{\n  \"a\": 1\n}");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result() {
        let temp = tempdir().unwrap();
        let result = call(
            &quick_bridge(temp.path()),
            ToolCallParams {
                name: "list_tools".to_string(),
                arguments: None,
            },
        )
        .await;
        assert!(result.is_error);
        assert_eq!(result.first_text(), Some("Unknown tool: list_tools"));
    }

    #[tokio::test]
    async fn relay_timeout_is_an_error_result() {
        let temp = tempdir().unwrap();
        let result = call(
            &quick_bridge(temp.path()),
            ToolCallParams {
                name: "message_box".to_string(),
                arguments: Some(json!({"message": "hi"}).as_object().unwrap().clone()),
            },
        )
        .await;
        assert!(result.is_error);
        assert!(result.first_text().unwrap().contains("did not respond"));
    }

    #[tokio::test]
    async fn check_connection_never_fails() {
        let temp = tempdir().unwrap();
        let result = call(
            &quick_bridge(temp.path()),
            ToolCallParams {
                name: "check_connection".to_string(),
                arguments: None,
            },
        )
        .await;
        assert!(!result.is_error);
        assert!(result.first_text().unwrap().contains("does not appear to be running"));
    }
}
