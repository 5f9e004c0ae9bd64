use async_trait::async_trait;
use futures_util::future::try_join_all;
use serde_json::json;

use crate::descriptor::{NodeDescription, PortDescription};
use crate::error::{EngineError, Result};
use crate::registry::{NodeContext, NodeHandler, NodeOutcome};
use crate::runner::RunOutcome;
use crate::types::{InputValues, NodeDescriptor, NodeValue, OutputValues};

use super::BOARD_KEY;

const LIST_PORT: &str = "list";

/// Runs the `board` sub-graph once per element of `list`, concurrently
///
/// Branch `k` receives `{item, index}` and reports under `[...path, k]`.
/// The node outputs `{list: [...]}` with each branch's outputs in order.
pub struct MapNode;

#[async_trait]
impl NodeHandler for MapNode {
    async fn invoke(&self, inputs: InputValues, context: &NodeContext<'_>) -> Result<NodeOutcome> {
        let graph = context.resolve_graph(BOARD_KEY)?;
        let items = inputs
            .get(LIST_PORT)
            .and_then(NodeValue::as_array)
            .ok_or_else(|| EngineError::failed(format!("map node '{}' needs a '{}' array", context.node_id(), LIST_PORT)))?;

        log::debug!("map node '{}' fanning out {} branches", context.node_id(), items.len());

        let branches = items.iter().enumerate().map(|(k, item)| {
            let mut path = context.path.to_vec();
            path.push(k);
            let branch_inputs = InputValues::from([
                ("item".to_string(), item.clone()),
                ("index".to_string(), json!(k)),
            ]);
            context.runner.run_nested(context.root, &graph, branch_inputs, path)
        });

        let mut results = Vec::with_capacity(items.len());
        for outcome in try_join_all(branches).await? {
            match outcome {
                RunOutcome::Finished { outputs } => {
                    results.push(NodeValue::Object(outputs.into_iter().collect()));
                }
                RunOutcome::NeedsInput { request, .. } => return Ok(NodeOutcome::Bubble(request)),
                RunOutcome::Suspended { .. } => return Err(EngineError::Cancelled),
            }
        }

        Ok(NodeOutcome::Outputs(OutputValues::from([(
            LIST_PORT.to_string(),
            NodeValue::Array(results),
        )])))
    }

    fn describe(&self, _descriptor: &NodeDescriptor) -> Result<Option<NodeDescription>> {
        Ok(Some(
            NodeDescription::new()
                .with_title("Map")
                .with_input(PortDescription::required(LIST_PORT))
                .with_output(PortDescription::optional(LIST_PORT)),
        ))
    }
}
