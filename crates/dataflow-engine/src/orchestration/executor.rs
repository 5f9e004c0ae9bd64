//! Stage-by-stage plan executor.
//!
//! [`PlanExecutor`] drives an [`Orchestrator`] with the handlers of a
//! [`NodeRegistry`]. The ready tasks of a stage are invoked concurrently;
//! their results are applied to the orchestrator one at a time once the
//! whole stage has resolved.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;

use crate::error::{EngineError, Result};
use crate::events::{Probe, ProbeEvent};
use crate::nodes::OUTPUT_NODE_TYPE;
use crate::registry::{InputRequest, NodeContext, NodeOutcome, NodeRegistry};
use crate::runner::{error_outputs, AbortSignal, GraphRunner};
use crate::types::{GraphDescriptor, InputValues, NodeId, OutputValues};

use super::orchestrator::Orchestrator;
use super::types::{NodeLifecycleState, OrchestratorProgress, Task};

/// Where an orchestrated execution stopped
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub execution_id: String,
    pub progress: OrchestratorProgress,
    /// Outputs of every succeeded `output` node, in plan order
    pub outputs: OutputValues,
    /// Requests from nodes now waiting for input
    pub waiting: Vec<InputRequest>,
    /// Nodes interrupted during this call
    pub interrupted: Vec<NodeId>,
}

impl PlanOutcome {
    pub fn is_finished(&self) -> bool {
        self.progress == OrchestratorProgress::Finished
    }
}

/// Executor for orchestration plans
pub struct PlanExecutor {
    /// Carries the registry, probe and abort signal; also runs sub-graphs
    runner: GraphRunner,
    /// Execution ID for this run
    execution_id: String,
}

impl PlanExecutor {
    /// Create a new executor with no probe
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            runner: GraphRunner::new(registry),
            execution_id: format!("plan-exec-{}", uuid::Uuid::new_v4()),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.runner = self.runner.with_probe(probe);
        self
    }

    pub fn with_abort_signal(mut self, abort: AbortSignal) -> Self {
        self.runner = self.runner.with_abort_signal(abort);
        self
    }

    /// Set the execution ID.
    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = execution_id.into();
        self
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Execute the orchestrator's plan until it finishes, waits or aborts.
    ///
    /// `graph` is the graph the plan was built from; `inputs` go to `input`
    /// nodes. Each node reports under `[i]`, its position in plan order.
    pub async fn run(
        &self,
        graph: &GraphDescriptor,
        orchestrator: &mut Orchestrator,
        inputs: InputValues,
    ) -> Result<PlanOutcome> {
        log::info!(
            "plan execution '{}' started ({} stages)",
            self.execution_id,
            orchestrator.plan().stages.len()
        );
        self.runner.emit(ProbeEvent::GraphStart {
            path: Vec::new(),
            title: graph.title.clone(),
            timestamp: Utc::now(),
        });
        self.drive(graph, orchestrator, &inputs).await
    }

    /// Answer a waiting node's input request and continue.
    ///
    /// `values` become the node's outputs.
    pub async fn provide_input(
        &self,
        graph: &GraphDescriptor,
        orchestrator: &mut Orchestrator,
        node_id: &str,
        values: OutputValues,
    ) -> Result<PlanOutcome> {
        if orchestrator.node_state(node_id) != Some(NodeLifecycleState::Waiting) {
            return Err(EngineError::orchestration(format!(
                "Node '{}' is not waiting for input",
                node_id
            )));
        }
        let states = orchestrator.full_state();
        if let Some((position, info)) = states.iter().enumerate().find(|(_, info)| info.node.id == node_id) {
            let task = Task {
                node: info.node.clone(),
                inputs: info.inputs.clone().unwrap_or_default(),
            };
            self.runner.emit(ProbeEvent::Output {
                path: vec![position],
                node: task.node.clone(),
                outputs: values.clone(),
                bubbled: true,
                timestamp: Utc::now(),
            });
            self.runner.emit(ProbeEvent::NodeEnd {
                path: vec![position],
                inputs: task_inputs(&task),
                node: task.node,
                outputs: values.clone(),
                timestamp: Utc::now(),
            });
        }
        orchestrator.set_working(node_id)?;
        orchestrator.provide_outputs(node_id, values)?;
        self.drive(graph, orchestrator, &InputValues::new()).await
    }

    async fn drive(
        &self,
        graph: &GraphDescriptor,
        orchestrator: &mut Orchestrator,
        run_inputs: &InputValues,
    ) -> Result<PlanOutcome> {
        let positions: HashMap<NodeId, usize> = orchestrator
            .full_state()
            .into_iter()
            .enumerate()
            .map(|(i, info)| (info.node.id, i))
            .collect();
        let mut waiting = Vec::new();
        let mut interrupted = Vec::new();

        loop {
            if self.runner.abort_signal().is_aborted() {
                interrupted.extend(orchestrator.abort()?);
                break;
            }
            let tasks = orchestrator.current_tasks();
            if tasks.is_empty() {
                break;
            }

            let mut handlers = Vec::with_capacity(tasks.len());
            for task in &tasks {
                let handler = self.runner.registry().get(&task.node.node_type).ok_or_else(|| {
                    EngineError::UnknownNodeType {
                        node_id: task.node.id.clone(),
                        node_type: task.node.node_type.clone(),
                    }
                })?;
                orchestrator.set_working(&task.node.id)?;
                handlers.push(handler);
            }
            log::debug!(
                "stage {}: invoking {} tasks",
                orchestrator.current_stage(),
                tasks.len()
            );

            let invocations = tasks.iter().zip(&handlers).map(|(task, handler)| {
                let path = vec![positions.get(&task.node.id).copied().unwrap_or_default()];
                async move {
                    let inputs = task_inputs(task);
                    self.runner.emit(ProbeEvent::NodeStart {
                        path: path.clone(),
                        node: task.node.clone(),
                        inputs: inputs.clone(),
                        timestamp: Utc::now(),
                    });
                    let context = NodeContext {
                        descriptor: &task.node,
                        path: &path,
                        run_inputs,
                        root: graph,
                        runner: &self.runner,
                    };
                    let outcome = handler.invoke(inputs.clone(), &context).await;
                    (path, inputs, outcome)
                }
            });
            let results = join_all(invocations).await;

            for (task, (path, inputs, outcome)) in tasks.iter().zip(results) {
                let node_id = task.node.id.as_str();
                let outputs = match outcome {
                    Ok(NodeOutcome::Outputs(values)) => values,
                    Ok(NodeOutcome::Bubble(request)) => {
                        if request.path == path {
                            self.runner.emit(ProbeEvent::Input {
                                path,
                                node: task.node.clone(),
                                inputs,
                                bubbled: true,
                                timestamp: Utc::now(),
                            });
                        }
                        orchestrator.set_waiting(node_id)?;
                        waiting.push(request);
                        continue;
                    }
                    Err(EngineError::Cancelled) => {
                        log::info!("node '{}' was cancelled", node_id);
                        orchestrator.set_interrupted(node_id)?;
                        interrupted.push(node_id.to_string());
                        continue;
                    }
                    Err(e) => {
                        log::warn!("node '{}' failed: {}", node_id, e);
                        error_outputs(&e)
                    }
                };

                if task.node.node_type == OUTPUT_NODE_TYPE {
                    self.runner.emit(ProbeEvent::Output {
                        path: path.clone(),
                        node: task.node.clone(),
                        outputs: outputs.clone(),
                        bubbled: false,
                        timestamp: Utc::now(),
                    });
                }
                self.runner.emit(ProbeEvent::NodeEnd {
                    path,
                    node: task.node.clone(),
                    inputs,
                    outputs: outputs.clone(),
                    timestamp: Utc::now(),
                });
                orchestrator.provide_outputs(node_id, outputs)?;
            }

            if !waiting.is_empty() {
                log::info!("plan execution '{}' waiting on {} nodes", self.execution_id, waiting.len());
                break;
            }
        }

        let progress = orchestrator.progress();
        if progress == OrchestratorProgress::Finished {
            log::info!("plan execution '{}' finished", self.execution_id);
            self.runner.emit(ProbeEvent::GraphEnd {
                path: Vec::new(),
                timestamp: Utc::now(),
            });
        }

        Ok(PlanOutcome {
            execution_id: self.execution_id.clone(),
            progress,
            outputs: collected_outputs(orchestrator),
            waiting,
            interrupted,
        })
    }
}

/// A task's configuration overlaid by the inputs delivered to it
fn task_inputs(task: &Task) -> InputValues {
    let mut inputs = task.node.configuration.clone();
    inputs.extend(task.inputs.clone());
    inputs
}

fn collected_outputs(orchestrator: &Orchestrator) -> OutputValues {
    orchestrator
        .full_state()
        .into_iter()
        .filter(|info| info.node.node_type == OUTPUT_NODE_TYPE && info.state == NodeLifecycleState::Succeeded)
        .filter_map(|info| info.outputs)
        .flatten()
        .collect()
}
