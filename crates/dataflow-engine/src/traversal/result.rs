use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::edge_state::EdgeState;
use crate::types::{Edge, InputValues, NodeDescriptor, NodeId, OutputValues};

/// One visited node, plus everything needed to continue from it
///
/// This is plain data: a result serialized to JSON and read back in another
/// process resumes the traversal exactly where it left off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraversalResult {
    /// The node being visited
    pub descriptor: NodeDescriptor,
    /// The opportunity that led to this visit
    pub current: Edge,
    /// Configuration overlaid with available wired values
    pub inputs: InputValues,
    /// Required inputs that are not present
    #[serde(default)]
    pub missing_inputs: Vec<String>,
    /// Opportunities still waiting to be visited
    #[serde(default)]
    pub opportunities: VecDeque<Edge>,
    /// Outgoing edges of this node
    #[serde(default)]
    pub new_opportunities: Vec<Edge>,
    /// Edge state as of this visit, before this node's outputs
    #[serde(default)]
    pub state: EdgeState,
    /// Nodes whose skip has already been propagated
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub skipped: BTreeSet<NodeId>,
    /// Outputs, filled in by whoever completes the node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<OutputValues>,
    /// The node cannot run on this visit
    pub skip: bool,
}

impl TraversalResult {
    /// ID of the visited node
    pub fn node_id(&self) -> &str {
        &self.descriptor.id
    }

    /// Type of the visited node
    pub fn node_type(&self) -> &str {
        &self.descriptor.node_type
    }

    /// Whether outputs have been supplied for this visit
    pub fn is_complete(&self) -> bool {
        self.outputs.is_some()
    }
}
