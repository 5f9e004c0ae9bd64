//! Staged execution of acyclic graphs.
//!
//! [`build_plan`] levels a graph into stages. An [`Orchestrator`] tracks
//! the lifecycle of every node across those stages, and [`PlanExecutor`]
//! drives one with registered node handlers, invoking the nodes of a stage
//! concurrently.
//!
//! Cycles are rejected: condense them into single nodes before planning.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dataflow_engine::orchestration::{build_plan, Orchestrator, PlanExecutor};
//! use dataflow_engine::NodeRegistry;
//!
//! let mut orchestrator = Orchestrator::new(build_plan(&graph)?);
//! let executor = PlanExecutor::new(Arc::new(NodeRegistry::with_builtins()));
//! let outcome = executor.run(&graph, &mut orchestrator, inputs).await?;
//! for request in &outcome.waiting {
//!     let answer = ask_user(request);
//!     executor.provide_input(&graph, &mut orchestrator, &request.node_id, answer).await?;
//! }
//! ```

pub mod executor;
pub mod orchestrator;
pub mod plan;
pub mod types;

pub use executor::{PlanExecutor, PlanOutcome};
pub use orchestrator::{NoCallbacks, Orchestrator, OrchestratorCallbacks};
pub use plan::build_plan;
pub use types::{
    NodeLifecycleState, NodeStateInfo, OrchestrationPlan, OrchestratorProgress, PlanNodeInfo, Task,
};
