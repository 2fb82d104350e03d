//! Command dispatch table.
//!
//! A [`Command`] read from disk is decoded into a typed [`HostRequest`]
//! and then executed against a [`CadHost`]. Argument defaults match what
//! the add-in has always applied when a field is absent.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::host::{BoxSpec, CadHost, HostError, UserParameter};
use crate::catalog;
use crate::exchange::{Command, CommandName, Failure, FailureKind};

/// A decoded command with typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum HostRequest {
    /// Liveness probe.
    CheckConnection,
    /// List tools.
    ListTools,
    /// List resources.
    ListResources,
    /// List prompt templates.
    ListPrompts,
    /// Show a message box.
    MessageBox {
        /// Message text.
        message: String,
    },
    /// Create a sketch.
    CreateNewSketch {
        /// Plane to sketch on.
        plane_name: String,
    },
    /// Create or update a user parameter.
    CreateParameter(UserParameter),
    /// Create a box body.
    CreateBox(BoxSpec),
    /// Run a script.
    ExecuteScript {
        /// Script source.
        script: String,
    },
    /// Read a resource.
    ReadResource {
        /// Resource URI.
        uri: String,
    },
    /// Render a prompt template.
    GetPrompt {
        /// Prompt name.
        name: String,
        /// Value of the `description` argument.
        description: Option<String>,
    },
}

#[derive(Deserialize)]
struct MessageBoxArgs {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct SketchArgs {
    #[serde(default = "default_plane")]
    plane_name: String,
}

#[derive(Deserialize)]
struct ParameterArgs {
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "default_expression")]
    expression: String,
    #[serde(default = "default_unit")]
    unit: String,
    #[serde(default)]
    comment: String,
}

#[derive(Deserialize)]
struct BoxArgs {
    #[serde(default = "default_dimension")]
    length: f64,
    #[serde(default = "default_dimension")]
    width: f64,
    #[serde(default = "default_dimension")]
    height: f64,
    #[serde(default = "default_box_name")]
    name: String,
}

#[derive(Deserialize)]
struct ScriptArgs {
    #[serde(default)]
    script: String,
}

#[derive(Deserialize)]
struct ResourceArgs {
    #[serde(default)]
    uri: String,
}

#[derive(Deserialize)]
struct PromptArgs {
    #[serde(default)]
    name: String,
    #[serde(default)]
    args: Map<String, Value>,
}

fn default_plane() -> String {
    "XY".to_string()
}

fn default_expression() -> String {
    "10".to_string()
}

fn default_unit() -> String {
    "mm".to_string()
}

const fn default_dimension() -> f64 {
    10.0
}

fn default_box_name() -> String {
    "Box".to_string()
}

fn generated_parameter_name() -> String {
    format!("Param_{}", chrono::Utc::now().timestamp() % 10_000)
}

fn decode<T: DeserializeOwned>(
    name: CommandName,
    params: &Map<String, Value>,
) -> Result<T, Failure> {
    serde_json::from_value(Value::Object(params.clone())).map_err(|e| {
        Failure::new(
            FailureKind::Malformed,
            format!("Invalid arguments for '{name}': {e}"),
        )
    })
}

fn host_failure(error: HostError) -> Failure {
    Failure::new(FailureKind::HostApiError, error.to_string())
}

impl HostRequest {
    /// Decodes a command read from disk.
    ///
    /// # Errors
    ///
    /// Returns an `unknown_command` failure for names without a handler and
    /// a `malformed` failure for arguments of the wrong type.
    pub fn from_command(command: &Command) -> Result<Self, Failure> {
        let name = command
            .name()
            .map_err(|e| Failure::new(FailureKind::UnknownCommand, e.to_string()))?;
        let params = &command.params;

        Ok(match name {
            CommandName::CheckConnection => Self::CheckConnection,
            CommandName::ListTools => Self::ListTools,
            CommandName::ListResources => Self::ListResources,
            CommandName::ListPrompts => Self::ListPrompts,
            CommandName::MessageBox => {
                let args: MessageBoxArgs = decode(name, params)?;
                Self::MessageBox {
                    message: args.message,
                }
            }
            CommandName::CreateNewSketch => {
                let args: SketchArgs = decode(name, params)?;
                Self::CreateNewSketch {
                    plane_name: args.plane_name,
                }
            }
            CommandName::CreateParameter => {
                let args: ParameterArgs = decode(name, params)?;
                Self::CreateParameter(UserParameter {
                    name: args.name.unwrap_or_else(generated_parameter_name),
                    expression: args.expression,
                    unit: args.unit,
                    comment: args.comment,
                })
            }
            CommandName::CreateBox => {
                let args: BoxArgs = decode(name, params)?;
                Self::CreateBox(BoxSpec {
                    length_mm: args.length,
                    width_mm: args.width,
                    height_mm: args.height,
                    name: args.name,
                })
            }
            CommandName::ExecuteScript => {
                let args: ScriptArgs = decode(name, params)?;
                Self::ExecuteScript {
                    script: args.script,
                }
            }
            CommandName::ReadResource => {
                let args: ResourceArgs = decode(name, params)?;
                Self::ReadResource { uri: args.uri }
            }
            CommandName::GetPrompt => {
                let args: PromptArgs = decode(name, params)?;
                Self::GetPrompt {
                    name: args.name,
                    description: args
                        .args
                        .get(catalog::PROMPT_ARGUMENT)
                        .and_then(Value::as_str)
                        .map(str::to_string),
                }
            }
        })
    }

    /// Executes the request against the host.
    ///
    /// # Errors
    ///
    /// Returns a `host_api_error` failure if the host rejects the call.
    pub fn execute<H: CadHost + ?Sized>(self, host: &mut H) -> Result<Value, Failure> {
        match self {
            Self::CheckConnection => Ok(json!(format!(
                "Fusion 360 {} add-in is running. {} tools available.",
                host.version(),
                catalog::TOOLS.len()
            ))),
            Self::ListTools => Ok(json!(catalog::TOOLS)),
            Self::ListResources => Ok(json!(catalog::RESOURCES)),
            Self::ListPrompts => Ok(json!(catalog::PROMPTS)),
            Self::MessageBox { message } => {
                host.message_box(&message).map_err(host_failure)?;
                Ok(json!("Message displayed successfully"))
            }
            Self::CreateNewSketch { plane_name } => {
                let sketch = host.create_sketch(&plane_name).map_err(host_failure)?;
                Ok(json!(format!("Sketch created successfully: {sketch}")))
            }
            Self::CreateParameter(parameter) => create_parameter(host, &parameter),
            Self::CreateBox(spec) => {
                let body = host.create_box(&spec).map_err(host_failure)?;
                Ok(json!(format!(
                    "Box created: {body} ({} x {} x {} mm)",
                    spec.length_mm, spec.width_mm, spec.height_mm
                )))
            }
            Self::ExecuteScript { script } => {
                if script.trim().is_empty() {
                    return Err(Failure::new(
                        FailureKind::HostApiError,
                        "No script provided",
                    ));
                }
                let output = host.execute_script(&script).map_err(host_failure)?;
                Ok(json!(output))
            }
            Self::ReadResource { uri } => read_resource(host, &uri),
            Self::GetPrompt { name, description } => {
                let messages = catalog::render_prompt(&name, description.as_deref())
                    .ok_or_else(|| {
                        Failure::new(FailureKind::HostApiError, format!("Unknown prompt: {name}"))
                    })?;
                Ok(json!({ "messages": messages }))
            }
        }
    }
}

/// Adds the parameter, falling back to an update when the name is taken.
fn create_parameter<H: CadHost + ?Sized>(
    host: &mut H,
    parameter: &UserParameter,
) -> Result<Value, Failure> {
    match host.add_user_parameter(parameter) {
        Ok(created) => Ok(json!(format!(
            "Parameter created successfully: {} = {}",
            created.name, created.expression
        ))),
        Err(HostError::ParameterExists(_)) => {
            let updated = host
                .update_user_parameter(parameter)
                .map_err(host_failure)?;
            Ok(json!(format!(
                "Parameter updated: {} = {}",
                updated.name, updated.expression
            )))
        }
        Err(e) => Err(host_failure(e)),
    }
}

fn read_resource<H: CadHost + ?Sized>(host: &H, uri: &str) -> Result<Value, Failure> {
    let encode = |value: serde_json::Result<Value>| {
        value.map_err(|e| Failure::new(FailureKind::HostApiError, e.to_string()))
    };

    match uri {
        catalog::ACTIVE_DOCUMENT_URI => {
            encode(serde_json::to_value(host.active_document().map_err(host_failure)?))
        }
        catalog::DESIGN_STRUCTURE_URI => {
            encode(serde_json::to_value(host.design_structure().map_err(host_failure)?))
        }
        catalog::PARAMETERS_URI => {
            let parameters = host.parameters().map_err(host_failure)?;
            Ok(json!({ "parameters": parameters }))
        }
        _ => Err(Failure::new(
            FailureKind::HostApiError,
            format!("Unknown resource URI: {uri}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::CorrelationId;
    use crate::relay::SimulatedHost;

    fn command(name: &str, params: Value) -> Command {
        Command {
            id: CorrelationId::parse("1_test").unwrap(),
            command: name.to_string(),
            params: params.as_object().cloned().unwrap_or_default(),
            created_at_unix: 0.0,
        }
    }

    fn run(host: &mut SimulatedHost, name: &str, params: Value) -> Result<Value, Failure> {
        HostRequest::from_command(&command(name, params))?.execute(host)
    }

    #[test]
    fn unknown_command_is_reported() {
        let err = HostRequest::from_command(&command("warp_drive", json!({}))).unwrap_err();
        assert_eq!(err.kind, FailureKind::UnknownCommand);
        assert_eq!(err.message, "Unknown command: warp_drive");
    }

    #[test]
    fn wrong_argument_type_is_malformed() {
        let err =
            HostRequest::from_command(&command("create_box", json!({"length": "long"})))
                .unwrap_err();
        assert_eq!(err.kind, FailureKind::Malformed);
        assert!(err.message.contains("create_box"));
    }

    #[test]
    fn defaults_are_applied() {
        let request = HostRequest::from_command(&command("create_box", json!({}))).unwrap();
        assert_eq!(
            request,
            HostRequest::CreateBox(BoxSpec {
                length_mm: 10.0,
                width_mm: 10.0,
                height_mm: 10.0,
                name: "Box".to_string(),
            })
        );

        let request = HostRequest::from_command(&command("create_new_sketch", json!({}))).unwrap();
        assert_eq!(
            request,
            HostRequest::CreateNewSketch {
                plane_name: "XY".to_string()
            }
        );

        let HostRequest::CreateParameter(parameter) =
            HostRequest::from_command(&command("create_parameter", json!({}))).unwrap()
        else {
            panic!("Expected CreateParameter");
        };
        assert!(parameter.name.starts_with("Param_"));
        assert_eq!(parameter.expression, "10");
        assert_eq!(parameter.unit, "mm");
        assert_eq!(parameter.comment, "");
    }

    #[test]
    fn get_prompt_reads_nested_description() {
        let request = HostRequest::from_command(&command(
            "get_prompt",
            json!({"name": "create_sketch_prompt", "args": {"description": "a gear"}}),
        ))
        .unwrap();
        assert_eq!(
            request,
            HostRequest::GetPrompt {
                name: "create_sketch_prompt".to_string(),
                description: Some("a gear".to_string()),
            }
        );
    }

    #[test]
    fn host_errors_become_host_api_failures() {
        let mut host = SimulatedHost::new();
        let err = run(&mut host, "create_new_sketch", json!({"plane_name": "XY"})).unwrap_err();
        assert_eq!(err.kind, FailureKind::HostApiError);
        assert_eq!(err.message, "No active document");
    }

    #[test]
    fn create_parameter_falls_back_to_update() {
        let mut host = SimulatedHost::with_design("Enclosure");
        let created = run(
            &mut host,
            "create_parameter",
            json!({"name": "Width", "expression": "40", "unit": "mm", "comment": "outer"}),
        )
        .unwrap();
        assert_eq!(created, json!("Parameter created successfully: Width = 40"));

        let updated = run(
            &mut host,
            "create_parameter",
            json!({"name": "Width", "expression": "45", "unit": "mm"}),
        )
        .unwrap();
        assert_eq!(updated, json!("Parameter updated: Width = 45"));

        let parameters = host.parameters().unwrap();
        let width = parameters.iter().find(|p| p.name == "Width").unwrap();
        assert_eq!(width.expression, "45");
        assert_eq!(width.comment, "outer");
    }

    #[test]
    fn create_box_reports_dimensions() {
        let mut host = SimulatedHost::with_design("Enclosure");
        let result = run(
            &mut host,
            "create_box",
            json!({"length": 100.0, "width": 60.0, "height": 40.0, "name": "Shell"}),
        )
        .unwrap();
        assert_eq!(result, json!("Box created: Shell (100 x 60 x 40 mm)"));
    }

    #[test]
    fn blank_script_is_rejected_before_reaching_host() {
        let mut host = SimulatedHost::with_design("Enclosure");
        let err = run(&mut host, "execute_script", json!({"script": "   "})).unwrap_err();
        assert_eq!(err.message, "No script provided");
        assert!(host.scripts().is_empty());
    }

    #[test]
    fn read_resources() {
        let mut host = SimulatedHost::with_design("Enclosure");
        let doc = run(
            &mut host,
            "read_resource",
            json!({"uri": catalog::ACTIVE_DOCUMENT_URI}),
        )
        .unwrap();
        assert_eq!(doc["name"], "Enclosure");

        let params = run(&mut host, "read_resource", json!({"uri": catalog::PARAMETERS_URI}))
            .unwrap();
        assert!(params["parameters"].is_array());

        let err = run(&mut host, "read_resource", json!({"uri": "fusion://x"})).unwrap_err();
        assert_eq!(err.message, "Unknown resource URI: fusion://x");
    }

    #[test]
    fn listings_come_from_catalog() {
        let mut host = SimulatedHost::new();
        let tools = run(&mut host, "list_tools", json!({})).unwrap();
        assert_eq!(tools.as_array().unwrap().len(), catalog::TOOLS.len());
        assert_eq!(tools[0]["name"], "check_connection");

        let status = run(&mut host, "check_connection", json!({})).unwrap();
        assert!(status.as_str().unwrap().contains("6 tools available"));
    }

    #[test]
    fn unknown_prompt_fails() {
        let mut host = SimulatedHost::new();
        let err = run(&mut host, "get_prompt", json!({"name": "limerick"})).unwrap_err();
        assert_eq!(err.message, "Unknown prompt: limerick");
    }
}
