//! Node shape descriptions
//!
//! A handler may describe the ports a node of its type declares. The
//! traversal uses the required inputs from this description when deciding
//! whether a node can run; the rest is informational for tooling.

use serde::{Deserialize, Serialize};

/// Declared shape of a node type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescription {
    /// Human-readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Description of what the node does
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input port declarations
    #[serde(default)]
    pub inputs: Vec<PortDescription>,
    /// Output port declarations
    #[serde(default)]
    pub outputs: Vec<PortDescription>,
}

impl NodeDescription {
    /// Create an empty description
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Add an input port
    pub fn with_input(mut self, port: PortDescription) -> Self {
        self.inputs.push(port);
        self
    }

    /// Add an output port
    pub fn with_output(mut self, port: PortDescription) -> Self {
        self.outputs.push(port);
        self
    }

    /// Names of inputs the node cannot run without
    pub fn required_inputs(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
    }
}

/// Metadata for a single port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDescription {
    /// Port name as used in input/output maps
    pub name: String,
    /// Whether the port must be filled
    #[serde(default)]
    pub required: bool,
    /// Human-readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl PortDescription {
    /// Create a required port
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            title: None,
        }
    }

    /// Create an optional port
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            title: None,
        }
    }

    /// Set the label
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}
