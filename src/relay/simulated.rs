//! In-memory stand-in for the host application.
//!
//! Used by the `relay` CLI mode and by tests. Lengths are stored in
//! centimetres, the internal unit of the real host, so `create_box`
//! converts from millimetres on the way in.

use super::host::{
    BoxSpec, CadHost, ComponentSummary, DesignStructure, DocumentInfo, HostError,
    OccurrenceSummary, ParameterInfo, StandardPlane, UserParameter,
};

/// Version string reported by [`SimulatedHost`].
pub const SIMULATED_VERSION: &str = "simulated-2.0";

const DEFAULT_SCRIPT_RESULT: &str = "Script executed successfully";

/// A body created by extrusion.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    /// Body name.
    pub name: String,
    /// Extent along X, in centimetres.
    pub length_cm: f64,
    /// Extent along Y, in centimetres.
    pub width_cm: f64,
    /// Extent along Z, in centimetres.
    pub height_cm: f64,
}

/// A sketch and the plane it was created on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sketch {
    /// Sketch name.
    pub name: String,
    /// Name of the plane it lies on.
    pub plane: String,
}

/// An open document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Document name.
    pub name: String,
    /// Saved file name, if any.
    pub saved_as: Option<String>,
    /// Whether the document holds a design. Drawings do not.
    pub is_design: bool,
    /// Name of the root component.
    pub root_component: String,
    /// Bodies in the root component.
    pub bodies: Vec<Body>,
    /// Sketches in the root component.
    pub sketches: Vec<Sketch>,
    /// Occurrences in the root component.
    pub occurrences: Vec<OccurrenceSummary>,
    /// Named construction planes.
    pub construction_planes: Vec<String>,
    /// User parameters.
    pub parameters: Vec<ParameterInfo>,
}

impl Document {
    /// Creates an empty design document.
    #[must_use]
    pub fn design(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            root_component: format!("{name} v1"),
            name,
            saved_as: None,
            is_design: true,
            bodies: Vec::new(),
            sketches: Vec::new(),
            occurrences: Vec::new(),
            construction_planes: Vec::new(),
            parameters: Vec::new(),
        }
    }
}

/// A scripted, in-memory host.
#[derive(Debug, Clone, Default)]
pub struct SimulatedHost {
    document: Option<Document>,
    messages: Vec<String>,
    scripts: Vec<String>,
    sketch_count: usize,
}

impl SimulatedHost {
    /// Creates a host with no open document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a host with an empty design document open.
    #[must_use]
    pub fn with_design(name: impl Into<String>) -> Self {
        Self::with_document(Document::design(name))
    }

    /// Creates a host with the given document open.
    #[must_use]
    pub fn with_document(document: Document) -> Self {
        Self {
            document: Some(document),
            ..Self::default()
        }
    }

    /// The open document, if any.
    #[must_use]
    pub const fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    /// Messages shown so far, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Scripts executed so far, oldest first.
    #[must_use]
    pub fn scripts(&self) -> &[String] {
        &self.scripts
    }

    fn design(&self) -> Result<&Document, HostError> {
        let doc = self.document.as_ref().ok_or(HostError::NoActiveDocument)?;
        if doc.is_design {
            Ok(doc)
        } else {
            Err(HostError::NotADesign)
        }
    }

    fn design_mut(&mut self) -> Result<&mut Document, HostError> {
        let doc = self.document.as_mut().ok_or(HostError::NoActiveDocument)?;
        if doc.is_design {
            Ok(doc)
        } else {
            Err(HostError::NotADesign)
        }
    }

    fn next_sketch_name(&mut self) -> String {
        self.sketch_count += 1;
        format!("Sketch{}", self.sketch_count)
    }
}

fn validate_parameter_name(name: &str) -> Result<(), HostError> {
    let mut chars = name.chars();
    let starts_ok = chars.next().is_some_and(char::is_alphabetic);
    if starts_ok && chars.all(|c| c.is_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(HostError::InvalidArgument {
            name: "parameter name",
            message: format!(
                "'{name}' must start with a letter and contain only letters, digits or '_'"
            ),
        })
    }
}

/// Evaluates a literal or a reference to another parameter. Anything more
/// elaborate evaluates to zero.
fn evaluate(expression: &str, parameters: &[ParameterInfo]) -> f64 {
    let expression = expression.trim();
    expression.parse().unwrap_or_else(|_| {
        parameters
            .iter()
            .find(|p| p.name == expression)
            .map_or(0.0, |p| p.value)
    })
}

/// Extracts `text` from a line of the form `result = "text"`.
fn result_assignment(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix("result")?.trim_start();
    let value = rest.strip_prefix('=')?.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
}

impl CadHost for SimulatedHost {
    fn version(&self) -> String {
        SIMULATED_VERSION.to_string()
    }

    fn message_box(&mut self, message: &str) -> Result<(), HostError> {
        tracing::info!(message, "Message box shown");
        self.messages.push(message.to_string());
        Ok(())
    }

    fn create_sketch(&mut self, plane: &str) -> Result<String, HostError> {
        let doc = self.design()?;
        let plane_name = match StandardPlane::parse(plane) {
            Some(standard) => standard.as_str().to_string(),
            None => doc
                .construction_planes
                .iter()
                .find(|p| p.as_str() == plane)
                .cloned()
                .ok_or_else(|| HostError::PlaneNotFound(plane.to_string()))?,
        };

        let name = self.next_sketch_name();
        self.design_mut()?.sketches.push(Sketch {
            name: name.clone(),
            plane: plane_name,
        });
        Ok(name)
    }

    fn add_user_parameter(
        &mut self,
        parameter: &UserParameter,
    ) -> Result<ParameterInfo, HostError> {
        validate_parameter_name(&parameter.name)?;
        let doc = self.design_mut()?;
        if doc.parameters.iter().any(|p| p.name == parameter.name) {
            return Err(HostError::ParameterExists(parameter.name.clone()));
        }

        let info = ParameterInfo {
            name: parameter.name.clone(),
            value: evaluate(&parameter.expression, &doc.parameters),
            expression: parameter.expression.clone(),
            unit: parameter.unit.clone(),
            comment: parameter.comment.clone(),
        };
        doc.parameters.push(info.clone());
        Ok(info)
    }

    fn update_user_parameter(
        &mut self,
        parameter: &UserParameter,
    ) -> Result<ParameterInfo, HostError> {
        let doc = self.design_mut()?;
        let value = evaluate(&parameter.expression, &doc.parameters);
        let existing = doc
            .parameters
            .iter_mut()
            .find(|p| p.name == parameter.name)
            .ok_or_else(|| HostError::ParameterNotFound(parameter.name.clone()))?;

        existing.expression.clone_from(&parameter.expression);
        existing.value = value;
        existing.unit.clone_from(&parameter.unit);
        if !parameter.comment.is_empty() {
            existing.comment.clone_from(&parameter.comment);
        }
        Ok(existing.clone())
    }

    fn create_box(&mut self, spec: &BoxSpec) -> Result<String, HostError> {
        spec.validate()?;
        self.design()?;

        let sketch = self.next_sketch_name();
        let doc = self.design_mut()?;
        doc.sketches.push(Sketch {
            name: sketch,
            plane: StandardPlane::Xy.as_str().to_string(),
        });
        doc.bodies.push(Body {
            name: spec.name.clone(),
            length_cm: spec.length_mm / 10.0,
            width_cm: spec.width_mm / 10.0,
            height_cm: spec.height_mm / 10.0,
        });
        Ok(spec.name.clone())
    }

    fn execute_script(&mut self, script: &str) -> Result<String, HostError> {
        if script.trim().is_empty() {
            return Err(HostError::InvalidArgument {
                name: "script",
                message: "script is empty".to_string(),
            });
        }
        self.scripts.push(script.to_string());

        let mut result = DEFAULT_SCRIPT_RESULT.to_string();
        for line in script.lines() {
            if let Some(raised) = line.trim().strip_prefix("raise ") {
                return Err(HostError::Script(raised.trim().to_string()));
            }
            if let Some(text) = result_assignment(line) {
                result = text.to_string();
            }
        }
        Ok(result)
    }

    fn active_document(&self) -> Result<DocumentInfo, HostError> {
        let doc = self.document.as_ref().ok_or(HostError::NoActiveDocument)?;
        Ok(DocumentInfo {
            name: doc.name.clone(),
            path: doc.saved_as.clone().unwrap_or_else(|| "Unsaved".to_string()),
            document_type: if doc.is_design {
                "FusionDesignDocumentType"
            } else {
                "FusionDrawingDocumentType"
            }
            .to_string(),
        })
    }

    fn design_structure(&self) -> Result<DesignStructure, HostError> {
        let doc = self.design()?;
        Ok(DesignStructure {
            design_name: doc.name.clone(),
            root_component: ComponentSummary {
                name: doc.root_component.clone(),
                bodies: doc.bodies.iter().map(|b| b.name.clone()).collect(),
                sketches: doc.sketches.iter().map(|s| s.name.clone()).collect(),
                occurrences: doc.occurrences.clone(),
            },
        })
    }

    fn parameters(&self) -> Result<Vec<ParameterInfo>, HostError> {
        Ok(self.design()?.parameters.clone())
    }
}
