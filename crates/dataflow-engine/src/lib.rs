//! Dataflow Engine - resumable execution of dataflow graphs
//!
//! This crate runs graphs of typed nodes wired port to port. It supports:
//!
//! - Step-at-a-time traversal with a serializable cursor for pause/resume
//! - Constant edges, optional edges and skip propagation
//! - Accumulator-style cycles, bounded only by the caller
//! - Staged parallel execution of acyclic graphs with a node lifecycle
//! - Sub-graph invocation and concurrent map fan-out
//! - Hierarchical, path-keyed inspection of a run's events
//!
//! # Architecture
//!
//! - `Traversal`: the sequential stepper, yielding one `TraversalResult`
//!   per visited node
//! - `GraphRunner`: drives a traversal with handlers from a `NodeRegistry`
//!   and reports to a `Probe`
//! - `Orchestrator`: staged lifecycle state over an `OrchestrationPlan`,
//!   driven concurrently by `PlanExecutor`
//! - `RunObserver`: a probe that files events into a `PathRegistry`
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dataflow_engine::{Edge, GraphDescriptor, GraphRunner, NodeDescriptor, NodeRegistry};
//!
//! let graph = GraphDescriptor::new()
//!     .with_node(NodeDescriptor::new("input", "input"))
//!     .with_node(NodeDescriptor::new("output", "output"))
//!     .with_edge(Edge::wildcard("input", "output"));
//!
//! let runner = GraphRunner::new(Arc::new(NodeRegistry::with_builtins()));
//! let outcome = runner.run(&graph, inputs).await?;
//! ```

pub mod checkpoint;
pub mod config;
pub mod descriptor;
pub mod edge_state;
pub mod error;
pub mod events;
pub mod inspector;
pub mod nodes;
pub mod orchestration;
pub mod registry;
pub mod runner;
pub mod traversal;
pub mod types;
pub mod validation;

// Re-export key types
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use config::RunConfig;
pub use descriptor::{NodeDescription, PortDescription};
pub use edge_state::EdgeState;
pub use error::{EngineError, Result};
pub use events::{NullProbe, Probe, ProbeError, ProbeEvent, VecProbe};
pub use inspector::{PathRegistry, PathRegistryEntry, RunEdge, RunEvent, RunObserver};
pub use orchestration::{
    build_plan, NodeLifecycleState, NodeStateInfo, OrchestrationPlan, Orchestrator,
    OrchestratorCallbacks, OrchestratorProgress, PlanExecutor, PlanNodeInfo, PlanOutcome, Task,
};
pub use registry::{InputRequest, NodeContext, NodeHandler, NodeOutcome, NodeRegistry};
pub use runner::{AbortSignal, GraphRunner, RunOutcome, SuspendReason};
pub use traversal::{Traversal, TraversalResult};
pub use types::{
    Edge, GraphDescriptor, InputValues, NodeDescriptor, NodeId, NodeValue, OutputValues,
};
pub use validation::{detect_cycles, validate_graph, ValidationError};
