//! Built-in node types
//!
//! - `input`: hands the run's inputs to the graph, or asks for them
//! - `output`: collects its inputs into the run's outputs
//! - `passthrough`: echoes its inputs
//! - `invoke`: runs a sub-graph as a single node
//! - `map`: runs a sub-graph once per list item, concurrently

mod invoke;
mod io;
mod map;

pub use invoke::InvokeNode;
pub use io::{InputNode, OutputNode, PassthroughNode};
pub use map::MapNode;

use std::sync::Arc;

use crate::registry::NodeRegistry;

pub const INPUT_NODE_TYPE: &str = "input";
pub const OUTPUT_NODE_TYPE: &str = "output";
pub const PASSTHROUGH_NODE_TYPE: &str = "passthrough";
pub const INVOKE_NODE_TYPE: &str = "invoke";
pub const MAP_NODE_TYPE: &str = "map";

/// Configuration key naming the sub-graph of `invoke` and `map` nodes
pub const BOARD_KEY: &str = "board";

/// Register every built-in node type
pub fn register_builtins(registry: &mut NodeRegistry) {
    registry.register(INPUT_NODE_TYPE, Arc::new(InputNode));
    registry.register(OUTPUT_NODE_TYPE, Arc::new(OutputNode));
    registry.register(PASSTHROUGH_NODE_TYPE, Arc::new(PassthroughNode));
    registry.register(INVOKE_NODE_TYPE, Arc::new(InvokeNode));
    registry.register(MAP_NODE_TYPE, Arc::new(MapNode));
}
