use async_trait::async_trait;

use crate::error::Result;
use crate::registry::{NodeContext, NodeHandler, NodeOutcome};
use crate::types::InputValues;

const SCHEMA_KEY: &str = "schema";

/// Supplies the run's inputs, or bubbles a request when there are none
pub struct InputNode;

#[async_trait]
impl NodeHandler for InputNode {
    async fn invoke(&self, _inputs: InputValues, context: &NodeContext<'_>) -> Result<NodeOutcome> {
        if context.run_inputs.is_empty() {
            log::debug!("input node '{}' has no run inputs; bubbling", context.node_id());
            return Ok(NodeOutcome::Bubble(context.input_request()));
        }
        Ok(NodeOutcome::Outputs(context.run_inputs.clone()))
    }
}

/// Echoes its inputs minus any `schema`; the runner gathers them into the
/// run's outputs
pub struct OutputNode;

#[async_trait]
impl NodeHandler for OutputNode {
    async fn invoke(&self, mut inputs: InputValues, _context: &NodeContext<'_>) -> Result<NodeOutcome> {
        inputs.remove(SCHEMA_KEY);
        Ok(NodeOutcome::Outputs(inputs))
    }
}

pub struct PassthroughNode;

#[async_trait]
impl NodeHandler for PassthroughNode {
    async fn invoke(&self, inputs: InputValues, _context: &NodeContext<'_>) -> Result<NodeOutcome> {
        Ok(NodeOutcome::Outputs(inputs))
    }
}
