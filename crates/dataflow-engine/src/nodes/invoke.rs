use async_trait::async_trait;

use crate::error::{EngineError, Result};
use crate::registry::{NodeContext, NodeHandler, NodeOutcome};
use crate::runner::RunOutcome;
use crate::types::InputValues;

use super::BOARD_KEY;

/// Runs the sub-graph named by `board` as a single node
///
/// The node's inputs become the sub-graph's run inputs and the sub-graph's
/// outputs become the node's outputs. Nodes inside the sub-graph report
/// under this node's path.
pub struct InvokeNode;

#[async_trait]
impl NodeHandler for InvokeNode {
    async fn invoke(&self, mut inputs: InputValues, context: &NodeContext<'_>) -> Result<NodeOutcome> {
        let graph = context.resolve_graph(BOARD_KEY)?;
        inputs.remove(BOARD_KEY);

        let outcome = context
            .runner
            .run_nested(context.root, &graph, inputs, context.path.to_vec())
            .await?;

        match outcome {
            RunOutcome::Finished { outputs } => Ok(NodeOutcome::Outputs(outputs)),
            RunOutcome::NeedsInput { request, .. } => Ok(NodeOutcome::Bubble(request)),
            RunOutcome::Suspended { .. } => Err(EngineError::Cancelled),
        }
    }
}
