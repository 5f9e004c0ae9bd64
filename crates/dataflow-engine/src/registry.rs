//! Node type registry for dynamic node resolution
//!
//! A node's `type` string selects its behavior at runtime. The registry maps
//! each type to a [`NodeHandler`] that can invoke the node and, optionally,
//! describe the ports it declares.
//!
//! # Usage
//!
//! ```ignore
//! use dataflow_engine::{NodeRegistry, NodeOutcome};
//!
//! let mut registry = NodeRegistry::with_builtins();
//! registry.register_sync("upper", |_node_id, inputs| {
//!     let text = inputs.get("text").and_then(|v| v.as_str()).unwrap_or_default();
//!     Ok([("text".to_string(), text.to_uppercase().into())].into())
//! });
//! ```

use std::borrow::Cow;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::descriptor::NodeDescription;
use crate::error::{EngineError, Result};
use crate::runner::{AbortSignal, GraphRunner};
use crate::types::{GraphDescriptor, InputValues, NodeDescriptor, NodeId, NodeValue, OutputValues};

/// Per-node-type behavior
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Invoke a node of this type with its computed inputs
    ///
    /// Inputs already include the node's configuration beneath any wired
    /// values. Returning `Err` does not abort the run; the runner converts
    /// it into an `$error` output.
    async fn invoke(&self, inputs: InputValues, context: &NodeContext<'_>) -> Result<NodeOutcome>;

    /// Describe the ports of a node of this type
    fn describe(&self, _descriptor: &NodeDescriptor) -> Result<Option<NodeDescription>> {
        Ok(None)
    }
}

/// What a node invocation produced
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// The node completed with these outputs
    Outputs(OutputValues),
    /// The node needs external input before it can complete
    Bubble(InputRequest),
}

/// A request for external input raised by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRequest {
    /// The node that needs input
    pub node_id: NodeId,
    /// Path of the node that raised the request
    pub path: Vec<usize>,
    /// Shape of the expected input, taken from the node's configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<NodeValue>,
}

/// Everything a handler can see about the node it is invoking
pub struct NodeContext<'a> {
    /// The node being invoked
    pub descriptor: &'a NodeDescriptor,
    /// Path of this invocation within the run
    pub path: &'a [usize],
    /// Inputs supplied to the enclosing run
    pub run_inputs: &'a InputValues,
    /// Outermost graph, used to resolve `#name` references
    pub root: &'a GraphDescriptor,
    /// Runner driving this invocation, used for nested runs
    pub runner: &'a GraphRunner,
}

impl<'a> NodeContext<'a> {
    /// ID of the node being invoked
    pub fn node_id(&self) -> &str {
        &self.descriptor.id
    }

    /// The run's abort signal
    pub fn abort_signal(&self) -> &AbortSignal {
        self.runner.abort_signal()
    }

    /// Build an input request for this node
    pub fn input_request(&self) -> InputRequest {
        InputRequest {
            node_id: self.descriptor.id.clone(),
            path: self.path.to_vec(),
            schema: self.descriptor.configuration.get("schema").cloned(),
        }
    }

    /// Resolve the graph named by configuration key `key`
    ///
    /// The value is either a `#name` reference into the root graph or an
    /// inline graph object.
    pub fn resolve_graph(&self, key: &str) -> Result<Cow<'a, GraphDescriptor>> {
        let value = self.descriptor.configuration.get(key).ok_or_else(|| {
            EngineError::failed(format!("node '{}' has no '{}' configured", self.descriptor.id, key))
        })?;
        match value {
            NodeValue::String(reference) => self
                .root
                .subgraph(reference)
                .map(Cow::Borrowed)
                .ok_or_else(|| EngineError::SubgraphNotFound(reference.clone())),
            other => Ok(Cow::Owned(serde_json::from_value(other.clone())?)),
        }
    }
}

/// Registry of node types and their handlers
pub struct NodeRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Create a registry holding the built-in node types
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::nodes::register_builtins(&mut registry);
        registry
    }

    /// Register a handler for a node type, replacing any previous one
    pub fn register(&mut self, node_type: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(node_type.into(), handler);
    }

    /// Register a node type backed by an async callback
    ///
    /// The callback receives (node_id, inputs) and returns outputs.
    pub fn register_callback<F, Fut>(&mut self, node_type: impl Into<String>, callback: F)
    where
        F: Fn(NodeId, InputValues) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<OutputValues>> + Send + 'static,
    {
        let handler = CallbackNodeHandler {
            callback: Box::new(move |node_id, inputs| Box::pin(callback(node_id, inputs))),
        };
        self.register(node_type, Arc::new(handler));
    }

    /// Register a node type backed by a synchronous callback
    pub fn register_sync(
        &mut self,
        node_type: impl Into<String>,
        callback: impl Fn(&str, InputValues) -> Result<OutputValues> + Send + Sync + 'static,
    ) {
        let handler = SyncCallbackNodeHandler {
            callback: Box::new(callback),
        };
        self.register(node_type, Arc::new(handler));
    }

    /// Get the handler for a node type
    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(node_type).cloned()
    }

    /// Check if a node type is registered
    pub fn has_node_type(&self, node_type: &str) -> bool {
        self.handlers.contains_key(node_type)
    }

    /// List all registered node type strings, sorted
    pub fn node_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    /// Describe a node, treating failures as "no schema available"
    pub fn describe(&self, descriptor: &NodeDescriptor) -> Option<NodeDescription> {
        let handler = self.handlers.get(&descriptor.node_type)?;
        match handler.describe(descriptor) {
            Ok(description) => description,
            Err(e) => {
                log::warn!(
                    "describe failed for node '{}' ({}): {}; using wiring only",
                    descriptor.id,
                    descriptor.node_type,
                    e
                );
                None
            }
        }
    }

    /// Merge another registry into this one
    ///
    /// Handlers from `other` override handlers in `self` for the same type.
    pub fn merge(&mut self, other: NodeRegistry) {
        self.handlers.extend(other.handlers);
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

type BoxedCallback = Box<
    dyn Fn(NodeId, InputValues) -> Pin<Box<dyn std::future::Future<Output = Result<OutputValues>> + Send>>
        + Send
        + Sync,
>;

/// Async callback-based handler
pub struct CallbackNodeHandler {
    callback: BoxedCallback,
}

#[async_trait]
impl NodeHandler for CallbackNodeHandler {
    async fn invoke(&self, inputs: InputValues, context: &NodeContext<'_>) -> Result<NodeOutcome> {
        let outputs = (self.callback)(context.node_id().to_string(), inputs).await?;
        Ok(NodeOutcome::Outputs(outputs))
    }
}

/// Synchronous callback-based handler
pub struct SyncCallbackNodeHandler {
    callback: Box<dyn Fn(&str, InputValues) -> Result<OutputValues> + Send + Sync>,
}

#[async_trait]
impl NodeHandler for SyncCallbackNodeHandler {
    async fn invoke(&self, inputs: InputValues, context: &NodeContext<'_>) -> Result<NodeOutcome> {
        (self.callback)(context.node_id(), inputs).map(NodeOutcome::Outputs)
    }
}
