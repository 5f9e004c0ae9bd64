//! Sequential graph runner
//!
//! [`GraphRunner`] drives a [`Traversal`] and invokes a handler for every
//! visited node. Each step completes before the next begins. A run stops
//! when the traversal is exhausted, when a node bubbles a request for
//! external input, when its abort signal is raised, or when a configured
//! limit is reached. Every suspension hands back a [`Checkpoint`] that
//! [`GraphRunner::resume`] continues from.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dataflow_engine::{GraphRunner, NodeRegistry, RunOutcome};
//!
//! let runner = GraphRunner::new(Arc::new(NodeRegistry::with_builtins()));
//! match runner.run(&graph, inputs).await? {
//!     RunOutcome::Finished { outputs } => println!("{:?}", outputs),
//!     RunOutcome::NeedsInput { request, mut checkpoint } => {
//!         checkpoint.provide(ask_user(&request));
//!         runner.resume(&graph, checkpoint).await?;
//!     }
//!     RunOutcome::Suspended { .. } => {}
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::json;

use crate::checkpoint::Checkpoint;
use crate::config::RunConfig;
use crate::error::{EngineError, Result};
use crate::events::{NullProbe, Probe, ProbeEvent};
use crate::nodes::OUTPUT_NODE_TYPE;
use crate::registry::{InputRequest, NodeContext, NodeOutcome, NodeRegistry};
use crate::traversal::{Traversal, TraversalResult};
use crate::types::{GraphDescriptor, InputValues, OutputValues, ERROR_PORT};
use crate::validation::validate_graph;

/// Shared cancellation flag
///
/// Clones share the same flag. Runners check it between steps.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Why a run stopped before finishing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    /// The abort signal was raised
    Aborted,
    /// The configured step limit was reached
    StepLimit,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The traversal completed or reached `stop_after`
    Finished { outputs: OutputValues },
    /// A node needs external input
    NeedsInput {
        request: InputRequest,
        checkpoint: Checkpoint,
    },
    /// The run stopped early; `checkpoint` is `None` if no node was visited
    Suspended {
        reason: SuspendReason,
        checkpoint: Option<Checkpoint>,
    },
}

impl RunOutcome {
    /// Outputs of a finished run
    pub fn outputs(&self) -> Option<&OutputValues> {
        match self {
            Self::Finished { outputs } => Some(outputs),
            _ => None,
        }
    }

    /// Checkpoint of a suspended run
    pub fn into_checkpoint(self) -> Option<Checkpoint> {
        match self {
            Self::Finished { .. } => None,
            Self::NeedsInput { checkpoint, .. } => Some(checkpoint),
            Self::Suspended { checkpoint, .. } => checkpoint,
        }
    }
}

/// One level of a (possibly nested) run
struct RunScope<'a> {
    /// Outermost graph, for sub-graph resolution
    root: &'a GraphDescriptor,
    /// Path of the invocation that owns this run
    prefix: Vec<usize>,
    run_inputs: InputValues,
    /// Top-level runs honor `stop_after` and `max_steps`
    top_level: bool,
}

impl RunScope<'_> {
    fn path(&self, index: usize) -> Vec<usize> {
        let mut path = self.prefix.clone();
        path.push(index);
        path
    }
}

/// Drives graph traversal with registered node handlers
#[derive(Clone)]
pub struct GraphRunner {
    registry: Arc<NodeRegistry>,
    config: RunConfig,
    probe: Arc<dyn Probe>,
    abort: AbortSignal,
}

impl GraphRunner {
    /// Create a runner with default configuration and no probe
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            config: RunConfig::default(),
            probe: Arc::new(NullProbe),
            abort: AbortSignal::new(),
        }
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Report run events to `probe`
    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_abort_signal(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn abort_signal(&self) -> &AbortSignal {
        &self.abort
    }

    /// Run `graph` from the start with the given inputs
    pub async fn run(&self, graph: &GraphDescriptor, inputs: InputValues) -> Result<RunOutcome> {
        if self.config.validate {
            let errors = validate_graph(graph, None);
            if !errors.is_empty() {
                return Err(EngineError::InvalidGraph(errors));
            }
        }

        let traversal = match &self.config.start {
            Some(start) => Traversal::starting_at(graph, &self.registry, start)?,
            None => Traversal::new(graph, &self.registry),
        };
        let scope = RunScope {
            root: graph,
            prefix: Vec::new(),
            run_inputs: inputs,
            top_level: true,
        };
        self.start_graph(&scope, graph);
        self.drive(&scope, traversal, 0, OutputValues::new()).await
    }

    /// Continue a suspended top-level run
    ///
    /// A checkpoint whose node has no outputs yet (e.g. an unanswered input
    /// request) invokes that node again. An answered one reports the answer
    /// as the node's bubbled output and ends it.
    pub async fn resume(&self, graph: &GraphDescriptor, checkpoint: Checkpoint) -> Result<RunOutcome> {
        let pending = checkpoint.is_pending();
        let Checkpoint {
            result,
            index,
            outputs,
            run_inputs,
            provided,
        } = checkpoint;
        log::info!("resuming run at node '{}'", result.node_id());

        let scope = RunScope {
            root: graph,
            prefix: Vec::new(),
            run_inputs,
            top_level: true,
        };
        if provided && !pending {
            self.end_answered(&scope, index, &result);
        }
        let traversal = Traversal::resume(graph, &self.registry, result);
        if pending {
            self.drive_from_pending(&scope, traversal, index, outputs).await
        } else {
            self.drive(&scope, traversal, index + 1, outputs).await
        }
    }

    /// Run a sub-graph under `path` on behalf of a node
    pub fn run_nested<'a>(
        &'a self,
        root: &'a GraphDescriptor,
        graph: &'a GraphDescriptor,
        inputs: InputValues,
        path: Vec<usize>,
    ) -> BoxFuture<'a, Result<RunOutcome>> {
        async move {
            let scope = RunScope {
                root,
                prefix: path,
                run_inputs: inputs,
                top_level: false,
            };
            self.start_graph(&scope, graph);
            self.drive(&scope, Traversal::new(graph, &self.registry), 0, OutputValues::new())
                .await
        }
        .boxed()
    }

    fn end_answered(&self, scope: &RunScope<'_>, index: usize, result: &TraversalResult) {
        let path = scope.path(index);
        let answer = result.outputs.clone().unwrap_or_default();
        self.emit(ProbeEvent::Output {
            path: path.clone(),
            node: result.descriptor.clone(),
            outputs: answer.clone(),
            bubbled: true,
            timestamp: Utc::now(),
        });
        self.emit(ProbeEvent::NodeEnd {
            path,
            node: result.descriptor.clone(),
            inputs: result.inputs.clone(),
            outputs: answer,
            timestamp: Utc::now(),
        });
    }

    fn start_graph(&self, scope: &RunScope<'_>, graph: &GraphDescriptor) {
        log::info!(
            "graph run started at {:?}{}",
            scope.prefix,
            graph.title.as_deref().map(|t| format!(" ({})", t)).unwrap_or_default()
        );
        self.emit(ProbeEvent::GraphStart {
            path: scope.prefix.clone(),
            title: graph.title.clone(),
            timestamp: Utc::now(),
        });
    }

    async fn drive_from_pending(
        &self,
        scope: &RunScope<'_>,
        mut traversal: Traversal<'_>,
        index: usize,
        mut outputs: OutputValues,
    ) -> Result<RunOutcome> {
        if let Some(stop) = self.invoke_current(scope, &mut traversal, index, &mut outputs).await? {
            return Ok(stop);
        }
        self.drive(scope, traversal, index + 1, outputs).await
    }

    async fn drive(
        &self,
        scope: &RunScope<'_>,
        mut traversal: Traversal<'_>,
        mut index: usize,
        mut outputs: OutputValues,
    ) -> Result<RunOutcome> {
        let mut steps = 0usize;

        loop {
            if self.abort.is_aborted() {
                log::info!("run at {:?} aborted", scope.prefix);
                return Ok(RunOutcome::Suspended {
                    reason: SuspendReason::Aborted,
                    checkpoint: checkpoint(traversal, index.saturating_sub(1), outputs, scope),
                });
            }
            if scope.top_level && self.config.max_steps.is_some_and(|max| steps >= max) {
                log::info!("run reached its step limit of {}", steps);
                return Ok(RunOutcome::Suspended {
                    reason: SuspendReason::StepLimit,
                    checkpoint: checkpoint(traversal, index.saturating_sub(1), outputs, scope),
                });
            }

            let Some(result) = traversal.next_result()? else {
                break;
            };
            steps += 1;

            let path = scope.path(index);
            self.emit(ProbeEvent::Edge {
                path: path.clone(),
                edge: result.current.clone(),
                value: result.inputs.clone(),
                timestamp: Utc::now(),
            });

            if result.skip {
                self.emit(ProbeEvent::Skip {
                    path,
                    node: result.descriptor.clone(),
                    inputs: result.inputs.clone(),
                    missing_inputs: result.missing_inputs.clone(),
                    timestamp: Utc::now(),
                });
                index += 1;
                continue;
            }

            if let Some(stop) = self.invoke_current(scope, &mut traversal, index, &mut outputs).await? {
                return Ok(stop);
            }
            index += 1;

            let stop_after = self.config.stop_after.as_deref();
            if scope.top_level && stop_after.is_some() && traversal.current().map(|r| r.node_id()) == stop_after {
                log::info!("stopping after node '{}'", stop_after.unwrap_or_default());
                break;
            }
        }

        log::info!("graph run at {:?} finished", scope.prefix);
        self.emit(ProbeEvent::GraphEnd {
            path: scope.prefix.clone(),
            timestamp: Utc::now(),
        });
        Ok(RunOutcome::Finished { outputs })
    }

    /// Invoke the node at the traversal's cursor
    ///
    /// Returns `Some` when the run has to stop here.
    async fn invoke_current(
        &self,
        scope: &RunScope<'_>,
        traversal: &mut Traversal<'_>,
        index: usize,
        outputs: &mut OutputValues,
    ) -> Result<Option<RunOutcome>> {
        let Some(result) = traversal.current() else {
            return Ok(None);
        };
        let descriptor = result.descriptor.clone();
        let inputs = result.inputs.clone();
        let path = scope.path(index);

        let handler = self
            .registry
            .get(&descriptor.node_type)
            .ok_or_else(|| EngineError::UnknownNodeType {
                node_id: descriptor.id.clone(),
                node_type: descriptor.node_type.clone(),
            })?;

        self.emit(ProbeEvent::NodeStart {
            path: path.clone(),
            node: descriptor.clone(),
            inputs: inputs.clone(),
            timestamp: Utc::now(),
        });

        let context = NodeContext {
            descriptor: &descriptor,
            path: &path,
            run_inputs: &scope.run_inputs,
            root: scope.root,
            runner: self,
        };

        let node_outputs = match handler.invoke(inputs.clone(), &context).await {
            Ok(NodeOutcome::Outputs(values)) => values,
            Ok(NodeOutcome::Bubble(request)) => {
                if request.path == path {
                    self.emit(ProbeEvent::Input {
                        path: path.clone(),
                        node: descriptor.clone(),
                        inputs: inputs.clone(),
                        bubbled: true,
                        timestamp: Utc::now(),
                    });
                }
                log::info!("node '{}' needs input; suspending run", descriptor.id);
                let stopped = std::mem::take(outputs);
                let Some(checkpoint) = checkpoint_ref(traversal, index, stopped, scope) else {
                    return Err(EngineError::failed("no traversal result to suspend at"));
                };
                return Ok(Some(RunOutcome::NeedsInput { request, checkpoint }));
            }
            Err(EngineError::Cancelled) => {
                log::info!("node '{}' was cancelled", descriptor.id);
                let stopped = std::mem::take(outputs);
                return Ok(Some(RunOutcome::Suspended {
                    reason: SuspendReason::Aborted,
                    checkpoint: checkpoint_ref(traversal, index, stopped, scope),
                }));
            }
            Err(e) => {
                log::warn!("node '{}' failed: {}", descriptor.id, e);
                error_outputs(&e)
            }
        };

        if descriptor.node_type == OUTPUT_NODE_TYPE {
            self.emit(ProbeEvent::Output {
                path: path.clone(),
                node: descriptor.clone(),
                outputs: node_outputs.clone(),
                bubbled: false,
                timestamp: Utc::now(),
            });
            outputs.extend(node_outputs.clone());
        }

        self.emit(ProbeEvent::NodeEnd {
            path,
            node: descriptor,
            inputs,
            outputs: node_outputs.clone(),
            timestamp: Utc::now(),
        });
        traversal.complete(node_outputs);
        Ok(None)
    }

    pub(crate) fn emit(&self, event: ProbeEvent) {
        let kind = event.kind();
        if let Err(e) = self.probe.report(event) {
            log::warn!("failed to report {} event: {}", kind, e);
        }
    }
}

/// The soft error output a failing handler produces
pub(crate) fn error_outputs(error: &EngineError) -> OutputValues {
    OutputValues::from([(
        ERROR_PORT.to_string(),
        json!({"kind": "error", "message": error.to_string()}),
    )])
}

fn checkpoint(
    traversal: Traversal<'_>,
    index: usize,
    outputs: OutputValues,
    scope: &RunScope<'_>,
) -> Option<Checkpoint> {
    traversal.into_current().map(|result| Checkpoint {
        result,
        index,
        outputs,
        run_inputs: scope.run_inputs.clone(),
        provided: false,
    })
}

fn checkpoint_ref(
    traversal: &Traversal<'_>,
    index: usize,
    outputs: OutputValues,
    scope: &RunScope<'_>,
) -> Option<Checkpoint> {
    traversal.current().cloned().map(|result| Checkpoint {
        result,
        index,
        outputs,
        run_inputs: scope.run_inputs.clone(),
        provided: false,
    })
}
