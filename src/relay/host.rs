//! The host application API as seen by the relay.

use serde::Serialize;
use thiserror::Error;

/// Errors raised by the host application.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// No document is open.
    #[error("No active document")]
    NoActiveDocument,

    /// The active document has no design product.
    #[error("Active document is not a design document")]
    NotADesign,

    /// Neither a standard plane nor a named construction plane matched.
    #[error("Could not find plane: {0}")]
    PlaneNotFound(String),

    /// A user parameter with this name already exists.
    #[error("Parameter already exists: {0}")]
    ParameterExists(String),

    /// No user parameter with this name exists.
    #[error("Parameter not found: {0}")]
    ParameterNotFound(String),

    /// An argument was rejected by the host.
    #[error("Invalid {name}: {message}")]
    InvalidArgument {
        /// Argument name.
        name: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// A script raised an error.
    #[error("Script error: {0}")]
    Script(String),

    /// Any other failure reported by the host API.
    #[error("{0}")]
    Api(String),
}

/// The three origin construction planes every design has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardPlane {
    /// The XY plane.
    Xy,
    /// The YZ plane.
    Yz,
    /// The XZ plane.
    Xz,
}

impl StandardPlane {
    /// Matches a standard plane name, ignoring case.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "XY" => Some(Self::Xy),
            "YZ" => Some(Self::Yz),
            "XZ" => Some(Self::Xz),
            _ => None,
        }
    }

    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Xy => "XY",
            Self::Yz => "YZ",
            Self::Xz => "XZ",
        }
    }
}

/// A user parameter to create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserParameter {
    /// Parameter name.
    pub name: String,
    /// Value expression, e.g. `"10"` or `"Width * 2"`.
    pub expression: String,
    /// Unit, e.g. `"mm"`.
    pub unit: String,
    /// Free-form comment.
    pub comment: String,
}

/// Dimensions of a box body, in millimetres.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxSpec {
    /// Extent along X.
    pub length_mm: f64,
    /// Extent along Y.
    pub width_mm: f64,
    /// Extent along Z.
    pub height_mm: f64,
    /// Name given to the new body.
    pub name: String,
}

impl BoxSpec {
    /// Checks that every dimension is finite and positive.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::InvalidArgument`] naming the first bad dimension.
    pub fn validate(&self) -> Result<(), HostError> {
        for (name, value) in [
            ("length", self.length_mm),
            ("width", self.width_mm),
            ("height", self.height_mm),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(HostError::InvalidArgument {
                    name,
                    message: format!("must be a positive number of millimetres, got {value}"),
                });
            }
        }
        Ok(())
    }
}

/// Summary of the active document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentInfo {
    /// Document name.
    pub name: String,
    /// Saved file name, or `"Unsaved"`.
    pub path: String,
    /// Document type.
    #[serde(rename = "type")]
    pub document_type: String,
}

/// An occurrence of a sub-component in the root component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OccurrenceSummary {
    /// Occurrence name.
    pub name: String,
    /// Name of the referenced component.
    pub component: String,
}

/// Contents of the root component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentSummary {
    /// Component name.
    pub name: String,
    /// Body names.
    pub bodies: Vec<String>,
    /// Sketch names.
    pub sketches: Vec<String>,
    /// Occurrences.
    pub occurrences: Vec<OccurrenceSummary>,
}

/// Structure of the active design.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesignStructure {
    /// Design name.
    pub design_name: String,
    /// The root component.
    pub root_component: ComponentSummary,
}

/// A parameter as reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterInfo {
    /// Parameter name.
    pub name: String,
    /// Evaluated value.
    pub value: f64,
    /// Value expression.
    pub expression: String,
    /// Unit.
    pub unit: String,
    /// Comment.
    pub comment: String,
}

/// Operations the relay invokes on the host application.
///
/// Calls are synchronous and are made from the relay's polling thread,
/// which for most embedded CAD environments must be the host's main thread.
pub trait CadHost {
    /// Host application version string.
    fn version(&self) -> String;

    /// Shows a message to the user.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot display the message.
    fn message_box(&mut self, message: &str) -> Result<(), HostError>;

    /// Creates a sketch on a standard plane (`XY`, `YZ`, `XZ`, any case) or
    /// on a construction plane with exactly this name. Returns the sketch name.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::PlaneNotFound`] if no plane matches.
    fn create_sketch(&mut self, plane: &str) -> Result<String, HostError>;

    /// Adds a new user parameter.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::ParameterExists`] if the name is taken.
    fn add_user_parameter(&mut self, parameter: &UserParameter) -> Result<ParameterInfo, HostError>;

    /// Updates an existing user parameter. An empty comment leaves the
    /// existing comment unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::ParameterNotFound`] if no such parameter exists.
    fn update_user_parameter(
        &mut self,
        parameter: &UserParameter,
    ) -> Result<ParameterInfo, HostError>;

    /// Sketches a rectangle on the XY plane and extrudes it into a new body.
    /// Returns the body name.
    ///
    /// # Errors
    ///
    /// Returns an error if the design is unavailable or a dimension is invalid.
    fn create_box(&mut self, spec: &BoxSpec) -> Result<String, HostError>;

    /// Runs a script and returns the text it leaves in `result`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Script`] if the script raises.
    fn execute_script(&mut self, script: &str) -> Result<String, HostError>;

    /// Describes the active document.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NoActiveDocument`] if nothing is open.
    fn active_document(&self) -> Result<DocumentInfo, HostError>;

    /// Describes the root component of the active design.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no active design.
    fn design_structure(&self) -> Result<DesignStructure, HostError>;

    /// Lists every parameter of the active design.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no active design.
    fn parameters(&self) -> Result<Vec<ParameterInfo>, HostError>;
}
