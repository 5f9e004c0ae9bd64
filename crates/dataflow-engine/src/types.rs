//! Core types for dataflow graphs
//!
//! These types define the declarative shape of a graph: node descriptors,
//! the edges that wire their ports together, and the named sub-graphs a
//! node can refer to from its configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Unique identifier for a node
pub type NodeId = String;

/// A single port value
pub type NodeValue = serde_json::Value;

/// Values flowing into a node, keyed by input port
pub type InputValues = BTreeMap<String, NodeValue>;

/// Values produced by a node, keyed by output port
pub type OutputValues = BTreeMap<String, NodeValue>;

/// Output port that carries a node's soft error
pub const ERROR_PORT: &str = "$error";

/// Out-port meaning "every output of the source node"
pub const WILDCARD_PORT: &str = "*";

/// Source id of the pseudo-edge used to enter a graph
pub const ENTRY_NODE: &str = "$entry";

/// A node instance in a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    /// Unique identifier within the graph
    pub id: NodeId,
    /// Handler key used for dispatch
    #[serde(rename = "type")]
    pub node_type: String,
    /// Static configuration, merged beneath wired inputs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configuration: BTreeMap<String, NodeValue>,
}

impl NodeDescriptor {
    /// Create a node with an empty configuration
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            configuration: BTreeMap::new(),
        }
    }

    /// Add a configuration value
    pub fn with_config(mut self, key: impl Into<String>, value: NodeValue) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }
}

/// A directed edge between two nodes
///
/// With both ports absent the edge only orders its endpoints and carries no
/// data. An `out` of `*` carries every output of `from`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Source node ID
    pub from: NodeId,
    /// Target node ID
    pub to: NodeId,
    /// Source port
    #[serde(rename = "out", default, skip_serializing_if = "Option::is_none")]
    pub out_port: Option<String>,
    /// Target port
    #[serde(rename = "in", default, skip_serializing_if = "Option::is_none")]
    pub in_port: Option<String>,
    /// The target may run without this edge's value
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
    /// The value is retained across reads
    #[serde(default, skip_serializing_if = "is_false")]
    pub constant: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Edge {
    /// An ordering-only edge
    pub fn control(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            out_port: None,
            in_port: None,
            optional: false,
            constant: false,
        }
    }

    /// An edge wiring `out` of `from` into `in` of `to`
    pub fn wired(
        from: impl Into<String>,
        out: impl Into<String>,
        to: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            out_port: Some(out.into()),
            in_port: Some(input.into()),
            ..Self::control(from, to)
        }
    }

    /// An edge carrying every output of `from`
    pub fn wildcard(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            out_port: Some(WILDCARD_PORT.to_string()),
            ..Self::control(from, to)
        }
    }

    /// Mark this edge optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Mark this edge constant
    pub fn constant(mut self) -> Self {
        self.constant = true;
        self
    }

    /// Whether this edge carries all outputs of its source
    pub fn is_wildcard(&self) -> bool {
        self.out_port.as_deref() == Some(WILDCARD_PORT)
    }

    /// The input port this edge must fill before its target can run
    pub fn required_port(&self) -> Option<&str> {
        if self.optional || self.is_wildcard() {
            return None;
        }
        match self.in_port.as_deref() {
            Some(port) if !port.is_empty() && port != WILDCARD_PORT => Some(port),
            _ => None,
        }
    }

    /// Whether this edge routes a node's `$error` output
    pub fn accepts_error(&self) -> bool {
        matches!(self.out_port.as_deref(), Some(ERROR_PORT) | Some(WILDCARD_PORT))
    }

    /// The pseudo-edge that enters a graph at `node_id`
    pub fn entry(node_id: impl Into<String>) -> Self {
        Self::control(ENTRY_NODE, node_id)
    }
}

/// A complete dataflow graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDescriptor {
    /// Human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Nodes in declaration order
    #[serde(default)]
    pub nodes: Vec<NodeDescriptor>,
    /// Edges in declaration order
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Named sub-graphs, referenced as `#name`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub graphs: BTreeMap<String, GraphDescriptor>,
}

impl GraphDescriptor {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the graph title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Append a node
    pub fn with_node(mut self, node: NodeDescriptor) -> Self {
        self.nodes.push(node);
        self
    }

    /// Append an edge
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Register a named sub-graph
    pub fn with_graph(mut self, name: impl Into<String>, graph: GraphDescriptor) -> Self {
        self.graphs.insert(name.into(), graph);
        self
    }

    /// Find a node by ID
    pub fn find_node(&self, id: &str) -> Option<&NodeDescriptor> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Get edges coming into a node
    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.to == node_id)
    }

    /// Get edges going out of a node
    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from == node_id)
    }

    /// Nodes with no incoming edges, in declaration order
    pub fn entries(&self) -> Vec<&NodeDescriptor> {
        self.nodes
            .iter()
            .filter(|n| self.incoming_edges(&n.id).next().is_none())
            .collect()
    }

    /// Resolve a `#name` reference against this graph's sub-graphs
    pub fn subgraph(&self, reference: &str) -> Option<&GraphDescriptor> {
        let name = reference.strip_prefix('#').unwrap_or(reference);
        self.graphs.get(name)
    }
}
