//! Error types for the dataflow engine

use thiserror::Error;

use crate::orchestration::NodeLifecycleState;
use crate::validation::ValidationError;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in the dataflow engine
///
/// Only fatal conditions are represented here. A node's own `$error` output
/// and skipped nodes flow through the run as data instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A node references a type with no registered handler
    #[error("Unknown node type '{node_type}' for node '{node_id}'")]
    UnknownNodeType { node_id: String, node_type: String },

    /// A node id that is not part of the graph or plan
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// A lifecycle transition the state machine does not allow
    #[error("Invalid lifecycle transition for node '{node_id}': {from} -> {to}")]
    InvalidTransition {
        node_id: String,
        from: NodeLifecycleState,
        to: NodeLifecycleState,
    },

    /// A cycle where an acyclic graph was required
    #[error("Cycle detected involving nodes: {}", .0.join(", "))]
    CycleDetected(Vec<String>),

    /// Structural problems found while validating a graph
    #[error("Invalid graph: {}", format_validation(.0))]
    InvalidGraph(Vec<ValidationError>),

    /// Orchestrator misuse that is not a single bad transition
    #[error("Orchestration error: {0}")]
    Orchestration(String),

    /// Task execution failed
    #[error("Task execution failed: {0}")]
    ExecutionFailed(String),

    /// A sub-graph reference that cannot be resolved
    #[error("Sub-graph not found: {0}")]
    SubgraphNotFound(String),

    /// Run was cancelled through its abort signal
    #[error("Run cancelled")]
    Cancelled,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create an execution failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Create an orchestration error with a message
    pub fn orchestration(msg: impl Into<String>) -> Self {
        Self::Orchestration(msg.into())
    }
}

fn format_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
