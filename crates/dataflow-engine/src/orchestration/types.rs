//! Plan and lifecycle types for staged execution.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Edge, InputValues, NodeDescriptor, OutputValues};

/// Lifecycle of a single node under an [`Orchestrator`](super::Orchestrator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeLifecycleState {
    /// Dependencies not yet resolved.
    Inactive,
    /// Dependencies met; waiting to be invoked.
    Ready,
    /// Invocation in progress.
    Working,
    /// Invocation paused on a request for external input.
    Waiting,
    Succeeded,
    /// Dependencies can never be met.
    Skipped,
    /// The node produced `$error`.
    Failed,
    /// Cancelled while working or waiting.
    Interrupted,
}

impl NodeLifecycleState {
    /// States with no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Skipped | Self::Failed | Self::Interrupted
        )
    }

    /// States where a node is currently doing something.
    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Working | Self::Waiting)
    }

    /// Whether the lifecycle allows moving from `self` to `to`.
    ///
    /// Staying in the same state is always allowed and is a no-op.
    pub fn can_transition_to(self, to: Self) -> bool {
        use NodeLifecycleState::*;

        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (Inactive, Ready | Skipped)
                | (Ready, Working | Succeeded | Failed | Skipped)
                | (Working, Waiting | Succeeded | Failed | Interrupted)
                | (Waiting, Working | Interrupted)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Ready => "ready",
            Self::Working => "working",
            Self::Waiting => "waiting",
            Self::Succeeded => "succeeded",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for NodeLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node together with the edges that connect it inside a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanNodeInfo {
    pub node: NodeDescriptor,
    /// Edges arriving at this node.
    pub upstream: Vec<Edge>,
    /// Edges leaving this node.
    pub downstream: Vec<Edge>,
}

impl PlanNodeInfo {
    pub fn id(&self) -> &str {
        &self.node.id
    }
}

/// Topological leveling of an acyclic graph.
///
/// Every upstream dependency of a node in `stages[k]` sits in an earlier
/// stage, and `k` is the lowest index for which that holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationPlan {
    pub stages: Vec<Vec<PlanNodeInfo>>,
}

impl OrchestrationPlan {
    /// Total number of nodes across all stages.
    pub fn node_count(&self) -> usize {
        self.stages.iter().map(Vec::len).sum()
    }

    /// Find a node's plan entry and its stage index.
    pub fn find(&self, node_id: &str) -> Option<(usize, &PlanNodeInfo)> {
        self.stages.iter().enumerate().find_map(|(stage, infos)| {
            infos.iter().find(|info| info.id() == node_id).map(|info| (stage, info))
        })
    }
}

/// Overall progress of an orchestrated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorProgress {
    /// Nothing has completed yet, or the run was reset.
    Initial,
    /// Some nodes of the current stage are still outstanding.
    Working,
    /// The current stage moved forward.
    Advanced,
    /// Every stage is resolved.
    Finished,
}

/// A node that is ready to be invoked, with its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub node: NodeDescriptor,
    pub inputs: InputValues,
}

/// Public view of one node's orchestration state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStateInfo {
    pub node: NodeDescriptor,
    pub state: NodeLifecycleState,
    pub stage: usize,
    pub inputs: Option<InputValues>,
    pub outputs: Option<OutputValues>,
}
