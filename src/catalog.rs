//! Static catalog of the tools, resources and prompts the bridge serves.
//!
//! Shared by the relay (which advertises it in its status file and answers
//! the `list_*` commands) and by the MCP server.

use serde::Serialize;

/// A tool exposed to the assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToolEntry {
    /// Tool name; equal to the relay command name.
    pub name: &'static str,
    /// Short description.
    pub description: &'static str,
}

/// A readable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceEntry {
    /// Resource URI.
    pub uri: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Short description.
    pub description: &'static str,
}

/// A prompt template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PromptEntry {
    /// Prompt name.
    pub name: &'static str,
    /// Short description.
    pub description: &'static str,
}

/// URI of the active-document resource.
pub const ACTIVE_DOCUMENT_URI: &str = "fusion://active-document-info";
/// URI of the design-structure resource.
pub const DESIGN_STRUCTURE_URI: &str = "fusion://design-structure";
/// URI of the parameters resource.
pub const PARAMETERS_URI: &str = "fusion://parameters";

/// Tools, in the order they are listed.
pub const TOOLS: &[ToolEntry] = &[
    ToolEntry {
        name: "check_connection",
        description: "Check if the Fusion 360 add-in is running and responsive",
    },
    ToolEntry {
        name: "message_box",
        description: "Display a message box in Fusion 360",
    },
    ToolEntry {
        name: "create_new_sketch",
        description: "Create a new sketch on the specified plane",
    },
    ToolEntry {
        name: "create_parameter",
        description: "Create or update a user parameter in the active design",
    },
    ToolEntry {
        name: "create_box",
        description: "Create a 3D box from dimensions in millimetres",
    },
    ToolEntry {
        name: "execute_script",
        description: "Execute a script using the Fusion 360 API",
    },
];

/// Resources, in the order they are listed.
pub const RESOURCES: &[ResourceEntry] = &[
    ResourceEntry {
        uri: ACTIVE_DOCUMENT_URI,
        name: "Active document",
        description: "Name, path and type of the active document",
    },
    ResourceEntry {
        uri: DESIGN_STRUCTURE_URI,
        name: "Design structure",
        description: "Bodies, sketches and occurrences of the root component",
    },
    ResourceEntry {
        uri: PARAMETERS_URI,
        name: "Parameters",
        description: "All parameters defined in the active design",
    },
];

/// Prompt templates, in the order they are listed.
pub const PROMPTS: &[PromptEntry] = &[
    PromptEntry {
        name: "create_sketch_prompt",
        description: "Expert guidance for creating sketches",
    },
    PromptEntry {
        name: "parameter_setup_prompt",
        description: "Expert guidance for setting up parameters",
    },
];

/// Name of the single argument every prompt takes.
pub const PROMPT_ARGUMENT: &str = "description";

/// Author of a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    /// Framing instructions.
    System,
    /// The user's request.
    User,
}

/// One message of a rendered prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    /// Message author.
    pub role: PromptRole,
    /// Message text.
    pub content: String,
}

/// Returns the tool entry with the given name.
#[must_use]
pub fn tool(name: &str) -> Option<&'static ToolEntry> {
    TOOLS.iter().find(|t| t.name == name)
}

/// Returns the resource entry with the given URI.
#[must_use]
pub fn resource(uri: &str) -> Option<&'static ResourceEntry> {
    RESOURCES.iter().find(|r| r.uri == uri)
}

/// Renders a prompt template. Returns `None` for unknown prompt names.
///
/// A missing or empty description falls back to `"Default"`.
#[must_use]
pub fn render_prompt(name: &str, description: Option<&str>) -> Option<Vec<PromptMessage>> {
    let description = description.filter(|d| !d.trim().is_empty()).unwrap_or("Default");

    let (system, user) = match name {
        "create_sketch_prompt" => (
            "You are an expert in Fusion 360 CAD modeling. \
             Help the user create sketches based on their descriptions. \
             Be specific about planes, sketch entities, dimensions, and constraints."
                .to_string(),
            format!(
                "I want to create a sketch with these requirements: {description}\n\n\
                 Please provide step-by-step instructions for creating this sketch in Fusion 360."
            ),
        ),
        "parameter_setup_prompt" => (
            "You are an expert in Fusion 360 parametric design. \
             Help the user set up parameters for their design. \
             Suggest appropriate parameter names, values, units, and descriptions."
                .to_string(),
            format!(
                "I want to set up parameters for: {description}\n\n\
                 What parameters should I create, and what values, units, and comments should they have?"
            ),
        ),
        _ => return None,
    };

    Some(vec![
        PromptMessage {
            role: PromptRole::System,
            content: system,
        },
        PromptMessage {
            role: PromptRole::User,
            content: user,
        },
    ])
}
