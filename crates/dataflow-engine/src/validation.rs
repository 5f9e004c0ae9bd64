//! Graph validation
//!
//! Checks graph structure before a run and detects cycles. Cycles are legal
//! in a traversed graph; [`detect_cycles`] exists for callers that need an
//! acyclic one, such as plan building.

use std::collections::{BTreeMap, HashSet, VecDeque};

use thiserror::Error;

use crate::registry::NodeRegistry;
use crate::types::{GraphDescriptor, NodeId, NodeValue};

/// Configuration keys that may name a sub-graph
const GRAPH_REFERENCE_KEYS: &[&str] = &["board", "graph"];

/// A structural problem in a graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Two nodes share an id
    #[error("Duplicate node id '{0}'")]
    DuplicateNode(NodeId),

    /// An edge references a non-existent node
    #[error("Edge {from} -> {to} references unknown node '{node_id}'")]
    UnknownNode {
        from: NodeId,
        to: NodeId,
        node_id: NodeId,
    },

    /// A node has a type missing from the registry
    #[error("Unknown node type '{node_type}' for node '{node_id}'")]
    UnknownNodeType { node_id: NodeId, node_type: String },

    /// A `#name` reference with no matching sub-graph
    #[error("Node '{node_id}' references missing sub-graph '{reference}'")]
    MissingSubgraph { node_id: NodeId, reference: String },
}

/// Validate a graph
///
/// Returns all validation errors found (not just the first).
/// Pass a registry to also check node types.
pub fn validate_graph(graph: &GraphDescriptor, registry: Option<&NodeRegistry>) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    validate_node_ids(graph, &mut errors);
    validate_edge_references(graph, &mut errors);
    validate_subgraph_references(graph, &mut errors);

    if let Some(registry) = registry {
        for node in &graph.nodes {
            if !registry.has_node_type(&node.node_type) {
                errors.push(ValidationError::UnknownNodeType {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                });
            }
        }
    }

    errors
}

fn validate_node_ids(graph: &GraphDescriptor, errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for node in &graph.nodes {
        if !seen.insert(node.id.as_str()) {
            errors.push(ValidationError::DuplicateNode(node.id.clone()));
        }
    }
}

/// Check that all edge endpoints exist
fn validate_edge_references(graph: &GraphDescriptor, errors: &mut Vec<ValidationError>) {
    let node_ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();

    for edge in &graph.edges {
        for endpoint in [&edge.from, &edge.to] {
            if !node_ids.contains(endpoint.as_str()) {
                errors.push(ValidationError::UnknownNode {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
    }
}

fn validate_subgraph_references(graph: &GraphDescriptor, errors: &mut Vec<ValidationError>) {
    for node in &graph.nodes {
        for key in GRAPH_REFERENCE_KEYS {
            if let Some(NodeValue::String(reference)) = node.configuration.get(*key) {
                if reference.starts_with('#') && graph.subgraph(reference).is_none() {
                    errors.push(ValidationError::MissingSubgraph {
                        node_id: node.id.clone(),
                        reference: reference.clone(),
                    });
                }
            }
        }
    }
}

/// Detect cycles using Kahn's algorithm (topological sort)
///
/// Returns the ids of nodes that could not be ordered, in declaration
/// order, or `None` if the graph is acyclic. Self-loops count as cycles.
pub fn detect_cycles(graph: &GraphDescriptor) -> Option<Vec<NodeId>> {
    let mut in_degree: BTreeMap<&str, usize> = graph.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    for edge in &graph.edges {
        if let Some(degree) = in_degree.get_mut(edge.to.as_str()) {
            *degree += 1;
        }
    }

    let mut queue: VecDeque<&str> = graph
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    let mut ordered = HashSet::new();
    while let Some(node_id) = queue.pop_front() {
        ordered.insert(node_id);
        for edge in graph.outgoing_edges(node_id) {
            if let Some(degree) = in_degree.get_mut(edge.to.as_str()) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(&edge.to);
                }
            }
        }
    }

    let cyclic: Vec<NodeId> = graph
        .nodes
        .iter()
        .filter(|n| !ordered.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect();
    (!cyclic.is_empty()).then_some(cyclic)
}
