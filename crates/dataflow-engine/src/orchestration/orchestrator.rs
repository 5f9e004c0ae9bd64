//! Per-node lifecycle bookkeeping for staged execution.
//!
//! The [`Orchestrator`] does not run anything itself. It hands out the
//! tasks of the current stage, records what the caller reports back, and
//! advances to the next stage once every node of the current one is
//! resolved. Nodes whose dependencies can no longer be met are skipped.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::edge_state::edge_values;
use crate::error::{EngineError, Result};
use crate::types::{InputValues, NodeId, NodeValue, OutputValues, ERROR_PORT};

use super::types::{
    NodeLifecycleState, NodeStateInfo, OrchestrationPlan, OrchestratorProgress, PlanNodeInfo, Task,
};

/// Receives lifecycle changes as they happen.
///
/// Each change is reported through exactly one of the two methods.
pub trait OrchestratorCallbacks: Send + Sync {
    /// A change requested by the consumer (working, waiting, cancellation)
    /// or a reset.
    fn state_changed(&self, _state: NodeLifecycleState, _info: &PlanNodeInfo) {}

    /// A change the orchestrator made on its own: dependencies met, skips,
    /// recorded outputs. `error` carries the node's `$error` output, if any.
    fn state_changed_by_orchestrator(
        &self,
        _node_id: &str,
        _state: NodeLifecycleState,
        _error: Option<&NodeValue>,
    ) {
    }
}

/// Callbacks that ignore everything.
pub struct NoCallbacks;

impl OrchestratorCallbacks for NoCallbacks {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeOrigin {
    Consumer,
    Orchestrator,
}

enum Advancement {
    /// Nothing more to do until the caller reports back.
    Done,
    /// The stage moved or may still have ready work.
    More,
}

struct NodeInternalState {
    plan: PlanNodeInfo,
    stage: usize,
    state: NodeLifecycleState,
    inputs: Option<InputValues>,
    outputs: Option<OutputValues>,
}

/// Lifecycle state machine over an [`OrchestrationPlan`].
pub struct Orchestrator {
    plan: OrchestrationPlan,
    callbacks: Arc<dyn OrchestratorCallbacks>,
    /// In plan order, stage by stage.
    nodes: Vec<NodeInternalState>,
    positions: HashMap<NodeId, usize>,
    current_stage: usize,
    progress: OrchestratorProgress,
    aborted: bool,
}

impl Orchestrator {
    pub fn new(plan: OrchestrationPlan) -> Self {
        let mut nodes = Vec::with_capacity(plan.node_count());
        let mut positions = HashMap::new();
        for (stage, infos) in plan.stages.iter().enumerate() {
            for info in infos {
                positions.insert(info.node.id.clone(), nodes.len());
                nodes.push(NodeInternalState {
                    plan: info.clone(),
                    stage,
                    state: NodeLifecycleState::Inactive,
                    inputs: None,
                    outputs: None,
                });
            }
        }

        let mut orchestrator = Self {
            plan,
            callbacks: Arc::new(NoCallbacks),
            nodes,
            positions,
            current_stage: 0,
            progress: OrchestratorProgress::Initial,
            aborted: false,
        };
        orchestrator.reset_at_stage(0);
        orchestrator
    }

    /// Report lifecycle changes to `callbacks`
    pub fn with_callbacks(mut self, callbacks: Arc<dyn OrchestratorCallbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn plan(&self) -> &OrchestrationPlan {
        &self.plan
    }

    pub fn progress(&self) -> OrchestratorProgress {
        self.progress
    }

    pub fn current_stage(&self) -> usize {
        self.current_stage
    }

    /// Whether any node is working or waiting
    pub fn is_working(&self) -> bool {
        self.nodes.iter().any(|n| n.state.is_in_progress())
    }

    /// Whether any node failed or was interrupted
    pub fn has_failures(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| matches!(n.state, NodeLifecycleState::Failed | NodeLifecycleState::Interrupted))
    }

    /// Whether advancement is halted by [`abort`](Self::abort)
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Bring every node back to its initial state.
    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.state = NodeLifecycleState::Inactive;
            node.inputs = None;
            node.outputs = None;
        }
        self.reset_at_stage(0);
    }

    /// Re-run from stage `stage`, keeping the results of earlier stages.
    ///
    /// Nodes that are working or waiting keep their state.
    pub fn restart_at_stage(&mut self, stage: usize) -> Result<()> {
        if stage > self.current_stage {
            return Err(EngineError::orchestration(format!(
                "Stage {} is beyond the current stage {}",
                stage, self.current_stage
            )));
        }
        self.reset_at_stage(stage);
        Ok(())
    }

    /// Re-run a single node, keeping the results of its stage siblings.
    pub fn restart_at_node(&mut self, node_id: &str) -> Result<()> {
        let position = self.position(node_id)?;
        let state = self.nodes[position].state;
        if !matches!(
            state,
            NodeLifecycleState::Ready
                | NodeLifecycleState::Succeeded
                | NodeLifecycleState::Failed
                | NodeLifecycleState::Interrupted
        ) {
            return Err(EngineError::orchestration(format!(
                "Unable to restart at node '{}': node state is '{}'",
                node_id, state
            )));
        }
        let stage = self.nodes[position].stage;

        let saved: Vec<(usize, OutputValues)> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, n)| n.stage == stage && *i != position)
            .filter_map(|(i, n)| n.outputs.clone().map(|outputs| (i, outputs)))
            .collect();

        self.restart_at_stage(stage)?;

        let mut failed = Vec::new();
        for (i, outputs) in saved {
            let restored = if outputs.contains_key(ERROR_PORT) {
                failed.push(i);
                NodeLifecycleState::Failed
            } else {
                NodeLifecycleState::Succeeded
            };
            self.nodes[i].outputs = Some(outputs);
            self.force_state(i, restored, ChangeOrigin::Orchestrator);
        }
        for i in failed {
            self.propagate_skip(i)?;
        }

        // skip propagation above may have settled the restarted node too
        self.force_state(position, NodeLifecycleState::Ready, ChangeOrigin::Orchestrator);
        self.current_stage = stage;
        self.progress = stage_progress(stage);
        log::debug!("restarted at node '{}' (stage {})", node_id, stage);
        Ok(())
    }

    /// Apply a single consumer-requested lifecycle transition.
    ///
    /// Transitions the lifecycle does not allow are rejected with
    /// [`EngineError::InvalidTransition`]. Staying in the same state is a
    /// no-op.
    pub fn advance(&mut self, node_id: &str, state: NodeLifecycleState) -> Result<()> {
        let position = self.position(node_id)?;
        self.transition(position, state, ChangeOrigin::Consumer)
    }

    /// Mark a ready or waiting node as working.
    pub fn set_working(&mut self, node_id: &str) -> Result<()> {
        self.advance(node_id, NodeLifecycleState::Working)
    }

    /// Mark a working node as waiting for input.
    pub fn set_waiting(&mut self, node_id: &str) -> Result<()> {
        self.advance(node_id, NodeLifecycleState::Waiting)
    }

    /// Interrupt a working or waiting node and skip what depends on it.
    pub fn set_interrupted(&mut self, node_id: &str) -> Result<()> {
        let position = self.position(node_id)?;
        if self.nodes[position].state == NodeLifecycleState::Interrupted {
            return Ok(());
        }
        self.transition(position, NodeLifecycleState::Interrupted, ChangeOrigin::Consumer)?;
        self.propagate_skip(position)
    }

    /// Interrupt every working or waiting node and halt advancement.
    ///
    /// Succeeded and skipped nodes are left alone. No tasks are handed out
    /// until the next reset or restart. Returns the interrupted node ids.
    pub fn abort(&mut self) -> Result<Vec<NodeId>> {
        let in_progress: Vec<usize> = (0..self.nodes.len())
            .filter(|i| self.nodes[*i].state.is_in_progress())
            .collect();

        let mut interrupted = Vec::with_capacity(in_progress.len());
        for position in in_progress {
            self.transition(position, NodeLifecycleState::Interrupted, ChangeOrigin::Consumer)?;
            self.propagate_skip(position)?;
            interrupted.push(self.nodes[position].plan.node.id.clone());
        }
        self.aborted = true;
        log::info!("orchestration aborted; interrupted {:?}", interrupted);
        Ok(interrupted)
    }

    /// Record the outputs of an invocation and advance.
    ///
    /// `$error` in `outputs` fails the node and skips its dependents;
    /// anything else succeeds it. Stages then advance until a task is ready
    /// or the plan is finished. Outputs for a node in an earlier stage are
    /// recorded without rolling later stages back.
    pub fn provide_outputs(&mut self, node_id: &str, outputs: OutputValues) -> Result<OrchestratorProgress> {
        if self.aborted {
            return Err(EngineError::orchestration(
                "Orchestration was aborted; reset or restart before providing outputs",
            ));
        }
        let position = self.position(node_id)?;
        let node = &self.nodes[position];
        if node.stage > self.current_stage {
            return Err(EngineError::orchestration(format!(
                "Can't provide outputs for node '{}' in a later stage",
                node_id
            )));
        }
        if node.state == NodeLifecycleState::Waiting {
            return Err(EngineError::orchestration(format!(
                "Can't provide outputs for node '{}' while it is waiting for input",
                node_id
            )));
        }
        let earlier_stage = node.stage < self.current_stage;
        let stage = node.stage;

        let failed = outputs.contains_key(ERROR_PORT);
        let target = if failed {
            NodeLifecycleState::Failed
        } else {
            NodeLifecycleState::Succeeded
        };
        let from = node.state;
        if !from.can_transition_to(target) {
            return Err(EngineError::InvalidTransition {
                node_id: node_id.to_string(),
                from,
                to: target,
            });
        }

        self.nodes[position].outputs = Some(outputs);
        self.transition(position, target, ChangeOrigin::Orchestrator)?;

        if failed {
            if earlier_stage {
                return Ok(self.progress);
            }
            self.propagate_skip(position)?;
        } else if earlier_stage {
            self.current_stage = stage;
        }

        loop {
            match self.try_advance()? {
                Advancement::Done => break,
                Advancement::More if !self.current_tasks().is_empty() => break,
                Advancement::More => {}
            }
        }
        Ok(self.progress)
    }

    /// Ready nodes of the current stage, with their inputs.
    pub fn current_tasks(&self) -> Vec<Task> {
        if self.aborted {
            return Vec::new();
        }
        self.nodes
            .iter()
            .filter(|n| n.stage == self.current_stage && n.state == NodeLifecycleState::Ready)
            .map(|n| Task {
                node: n.plan.node.clone(),
                inputs: n.inputs.clone().unwrap_or_default(),
            })
            .collect()
    }

    /// Build a task for any node whose inputs are known.
    pub fn task_from_id(&self, node_id: &str) -> Result<Task> {
        let node = &self.nodes[self.position(node_id)?];
        let inputs = node
            .inputs
            .clone()
            .ok_or_else(|| EngineError::orchestration(format!("Node '{}' has no inputs", node_id)))?;
        Ok(Task {
            node: node.plan.node.clone(),
            inputs,
        })
    }

    /// Lifecycle state of one node.
    pub fn node_state(&self, node_id: &str) -> Option<NodeLifecycleState> {
        self.positions.get(node_id).map(|i| self.nodes[*i].state)
    }

    /// Snapshot of every node's lifecycle state.
    pub fn state(&self) -> BTreeMap<NodeId, NodeLifecycleState> {
        self.nodes
            .iter()
            .map(|n| (n.plan.node.id.clone(), n.state))
            .collect()
    }

    /// Snapshot of every node's state, stage, inputs and outputs, in plan order.
    pub fn full_state(&self) -> Vec<NodeStateInfo> {
        self.nodes
            .iter()
            .map(|n| NodeStateInfo {
                node: n.plan.node.clone(),
                state: n.state,
                stage: n.stage,
                inputs: n.inputs.clone(),
                outputs: n.outputs.clone(),
            })
            .collect()
    }

    fn position(&self, node_id: &str) -> Result<usize> {
        self.positions
            .get(node_id)
            .copied()
            .ok_or_else(|| EngineError::NodeNotFound(node_id.to_string()))
    }

    fn reset_at_stage(&mut self, starting: usize) {
        for position in 0..self.nodes.len() {
            let node = &mut self.nodes[position];
            if node.stage < starting {
                continue;
            }
            let first = node.stage == starting;
            node.inputs = if first {
                Some(node.inputs.take().unwrap_or_default())
            } else {
                None
            };
            node.outputs = None;
            if !node.state.is_in_progress() {
                node.state = if first {
                    NodeLifecycleState::Ready
                } else {
                    NodeLifecycleState::Inactive
                };
            }
            self.notify(position, ChangeOrigin::Consumer);
        }
        self.current_stage = starting;
        self.progress = stage_progress(starting);
        self.aborted = false;
    }

    fn transition(&mut self, position: usize, to: NodeLifecycleState, origin: ChangeOrigin) -> Result<()> {
        let node = &mut self.nodes[position];
        let from = node.state;
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                node_id: node.plan.node.id.clone(),
                from,
                to,
            });
        }
        node.state = to;
        log::debug!("node '{}': {} -> {}", node.plan.node.id, from, to);
        self.notify(position, origin);
        Ok(())
    }

    /// Set a state outside the transition table (restarts)
    fn force_state(&mut self, position: usize, to: NodeLifecycleState, origin: ChangeOrigin) {
        if self.nodes[position].state == to {
            return;
        }
        self.nodes[position].state = to;
        self.notify(position, origin);
    }

    fn notify(&self, position: usize, origin: ChangeOrigin) {
        let node = &self.nodes[position];
        match origin {
            ChangeOrigin::Consumer => self.callbacks.state_changed(node.state, &node.plan),
            ChangeOrigin::Orchestrator => self.callbacks.state_changed_by_orchestrator(
                &node.plan.node.id,
                node.state,
                node.outputs.as_ref().and_then(|o| o.get(ERROR_PORT)),
            ),
        }
    }

    /// Skip everything downstream of `position`, then settle.
    ///
    /// Settling skips any idle node whose downstream nodes are all
    /// terminal, until nothing changes.
    fn propagate_skip(&mut self, position: usize) -> Result<()> {
        let mut queue = VecDeque::from([position]);
        let mut visited = HashSet::new();
        while let Some(current) = queue.pop_front() {
            let targets: Vec<NodeId> = self.nodes[current]
                .plan
                .downstream
                .iter()
                .map(|e| e.to.clone())
                .collect();
            for id in targets {
                if !visited.insert(id.clone()) {
                    continue;
                }
                let target = self.position(&id)?;
                let state = self.nodes[target].state;
                if !state.is_terminal() && !state.is_in_progress() {
                    self.transition(target, NodeLifecycleState::Skipped, ChangeOrigin::Orchestrator)?;
                    queue.push_back(target);
                }
            }
        }

        loop {
            let mut changed = false;
            for position in 0..self.nodes.len() {
                let node = &self.nodes[position];
                if node.state.is_terminal() || node.state.is_in_progress() || node.plan.downstream.is_empty() {
                    continue;
                }
                let all_terminal = node.plan.downstream.iter().all(|edge| {
                    self.node_state(&edge.to).is_some_and(NodeLifecycleState::is_terminal)
                });
                if all_terminal {
                    self.transition(position, NodeLifecycleState::Skipped, ChangeOrigin::Orchestrator)?;
                    changed = true;
                }
            }
            if !changed {
                return Ok(());
            }
        }
    }

    fn try_advance(&mut self) -> Result<Advancement> {
        let current = self.current_stage;
        if current >= self.plan.stages.len() {
            self.progress = OrchestratorProgress::Finished;
            return Ok(Advancement::Done);
        }

        let stage: Vec<usize> = (0..self.nodes.len())
            .filter(|i| self.nodes[*i].stage == current)
            .collect();
        let in_progress = stage.iter().any(|i| self.nodes[*i].state.is_in_progress());
        let complete = stage.iter().all(|i| {
            let state = self.nodes[*i].state;
            !state.is_in_progress() && state != NodeLifecycleState::Ready
        });
        if !complete {
            self.progress = OrchestratorProgress::Working;
            return Ok(if in_progress { Advancement::Done } else { Advancement::More });
        }

        let next = current + 1;
        if next >= self.plan.stages.len() {
            self.progress = OrchestratorProgress::Finished;
            log::info!("orchestration finished");
            return Ok(Advancement::Done);
        }

        let upcoming: Vec<usize> = (0..self.nodes.len())
            .filter(|i| self.nodes[*i].stage == next)
            .collect();
        for position in upcoming {
            let state = self.nodes[position].state;
            if state.is_terminal() || state.is_in_progress() {
                continue;
            }
            match self.gather_inputs(position)? {
                Some(inputs) => {
                    self.nodes[position].inputs = Some(inputs);
                    self.transition(position, NodeLifecycleState::Ready, ChangeOrigin::Orchestrator)?;
                }
                None => {
                    self.transition(position, NodeLifecycleState::Skipped, ChangeOrigin::Orchestrator)?;
                    self.propagate_skip(position)?;
                }
            }
        }

        self.current_stage = next;
        self.progress = OrchestratorProgress::Advanced;
        log::debug!("advanced to stage {}", next);
        Ok(Advancement::More)
    }

    /// Inputs delivered by upstream nodes, or `None` when some can't arrive
    fn gather_inputs(&self, position: usize) -> Result<Option<InputValues>> {
        let info = &self.nodes[position].plan;
        let mut inputs = InputValues::new();
        for edge in &info.upstream {
            let from = &self.nodes[self.position(&edge.from)?];
            match from.state {
                NodeLifecycleState::Skipped | NodeLifecycleState::Failed | NodeLifecycleState::Interrupted => {
                    return Ok(None);
                }
                NodeLifecycleState::Succeeded => {
                    let delivered = from.outputs.as_ref().and_then(|outputs| edge_values(edge, outputs));
                    match delivered {
                        Some(values) => inputs.extend(values),
                        None if edge.optional => {}
                        None => return Ok(None),
                    }
                }
                state => {
                    return Err(EngineError::orchestration(format!(
                        "While advancing, upstream node '{}' of '{}' is still {}",
                        edge.from,
                        info.node.id,
                        state
                    )));
                }
            }
        }
        Ok(Some(inputs))
    }
}

fn stage_progress(stage: usize) -> OrchestratorProgress {
    if stage == 0 {
        OrchestratorProgress::Initial
    } else {
        OrchestratorProgress::Advanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::build_plan;
    use crate::types::{Edge, GraphDescriptor, NodeDescriptor};
    use parking_lot::Mutex;
    use serde_json::json;
    use NodeLifecycleState::*;

    fn graph(nodes: &[&str], edges: &[(&str, &str, &str, &str)]) -> GraphDescriptor {
        let mut graph = GraphDescriptor::new();
        for id in nodes {
            graph = graph.with_node(NodeDescriptor::new(*id, "work"));
        }
        for (from, out, to, input) in edges {
            graph = graph.with_edge(Edge::wired(*from, *out, *to, *input));
        }
        graph
    }

    fn diamond() -> Orchestrator {
        let g = graph(
            &["input", "left-channel", "right-channel", "mixer"],
            &[
                ("input", "left", "left-channel", "signal"),
                ("input", "right", "right-channel", "signal"),
                ("left-channel", "processed", "mixer", "left"),
                ("right-channel", "processed", "mixer", "right"),
            ],
        );
        Orchestrator::new(build_plan(&g).unwrap())
    }

    fn router() -> Orchestrator {
        let g = graph(
            &["choose-path", "left-path", "right-path", "treasure", "dragon"],
            &[
                ("choose-path", "left", "left-path", "travel"),
                ("choose-path", "right", "right-path", "travel"),
                ("left-path", "arrive", "treasure", "encounter"),
                ("right-path", "arrive", "dragon", "encounter"),
            ],
        );
        Orchestrator::new(build_plan(&g).unwrap())
    }

    fn converge() -> Orchestrator {
        let g = graph(
            &["start-a", "start-b", "start-c", "end"],
            &[
                ("start-a", "context", "end", "in-1"),
                ("start-b", "context", "end", "in-2"),
                ("start-c", "context", "end", "in-3"),
            ],
        );
        Orchestrator::new(build_plan(&g).unwrap())
    }

    fn outputs(pairs: &[(&str, &str)]) -> OutputValues {
        pairs.iter().map(|(k, v)| (k.to_string(), json!(v))).collect()
    }

    fn task_ids(orchestrator: &Orchestrator) -> Vec<String> {
        orchestrator.current_tasks().into_iter().map(|t| t.node.id).collect()
    }

    fn assert_state(orchestrator: &Orchestrator, expected: &[(&str, NodeLifecycleState)]) {
        let expected: BTreeMap<NodeId, NodeLifecycleState> =
            expected.iter().map(|(id, s)| (id.to_string(), *s)).collect();
        assert_eq!(orchestrator.state(), expected);
    }

    #[test]
    fn test_diamond_advances_stage_by_stage() {
        let mut o = diamond();
        assert_eq!(task_ids(&o), vec!["input"]);
        assert_eq!(o.progress(), OrchestratorProgress::Initial);

        let progress = o
            .provide_outputs("input", outputs(&[("left", "left-audio"), ("right", "right-audio")]))
            .unwrap();
        assert_eq!(progress, OrchestratorProgress::Advanced);
        assert_eq!(task_ids(&o), vec!["left-channel", "right-channel"]);
        assert_eq!(
            o.task_from_id("left-channel").unwrap().inputs,
            outputs(&[("signal", "left-audio")])
        );

        let progress = o
            .provide_outputs("left-channel", outputs(&[("processed", "l")]))
            .unwrap();
        assert_eq!(progress, OrchestratorProgress::Working);
        assert_eq!(task_ids(&o), vec!["right-channel"]);

        let progress = o
            .provide_outputs("right-channel", outputs(&[("processed", "r")]))
            .unwrap();
        assert_eq!(progress, OrchestratorProgress::Advanced);
        assert_eq!(task_ids(&o), vec!["mixer"]);
        assert_eq!(
            o.task_from_id("mixer").unwrap().inputs,
            outputs(&[("left", "l"), ("right", "r")])
        );

        let progress = o.provide_outputs("mixer", outputs(&[("result", "mixed")])).unwrap();
        assert_eq!(progress, OrchestratorProgress::Finished);
        assert!(task_ids(&o).is_empty());
        assert_state(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Succeeded),
                ("right-channel", Succeeded),
                ("mixer", Succeeded),
            ],
        );
    }

    #[test]
    fn test_missing_input_skips_everything_downstream() {
        let mut o = diamond();
        let progress = o.provide_outputs("input", outputs(&[("left", "left-audio")])).unwrap();

        assert_eq!(progress, OrchestratorProgress::Finished);
        assert!(task_ids(&o).is_empty());
        assert_state(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Skipped),
                ("right-channel", Skipped),
                ("mixer", Skipped),
            ],
        );
    }

    #[test]
    fn test_error_at_entry_skips_everything() {
        let mut o = diamond();
        let progress = o
            .provide_outputs("input", outputs(&[("$error", "Unable to get input")]))
            .unwrap();

        assert_eq!(progress, OrchestratorProgress::Finished);
        assert_state(
            &o,
            &[
                ("input", Failed),
                ("left-channel", Skipped),
                ("right-channel", Skipped),
                ("mixer", Skipped),
            ],
        );
        assert!(o.has_failures());
    }

    #[test]
    fn test_error_at_converge_skips_sibling() {
        let mut o = diamond();
        o.provide_outputs("input", outputs(&[("left", "l"), ("right", "r")]))
            .unwrap();
        let progress = o
            .provide_outputs("left-channel", outputs(&[("$error", "Unable to process")]))
            .unwrap();

        assert_eq!(progress, OrchestratorProgress::Finished);
        assert_state(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Failed),
                ("right-channel", Skipped),
                ("mixer", Skipped),
            ],
        );

        // a skipped node can't be completed without a restart
        let err = o
            .provide_outputs("right-channel", outputs(&[("processed", "late")]))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { from: Skipped, to: Succeeded, .. }));
    }

    #[test]
    fn test_router_skips_untaken_branch() {
        let mut o = router();
        let progress = o.provide_outputs("choose-path", outputs(&[("left", "left")])).unwrap();
        assert_eq!(progress, OrchestratorProgress::Advanced);
        assert_eq!(task_ids(&o), vec!["left-path"]);
        assert_state(
            &o,
            &[
                ("choose-path", Succeeded),
                ("left-path", Ready),
                ("right-path", Skipped),
                ("treasure", Inactive),
                ("dragon", Skipped),
            ],
        );

        let progress = o.provide_outputs("left-path", outputs(&[("arrive", "treasure")])).unwrap();
        assert_eq!(progress, OrchestratorProgress::Advanced);
        assert_eq!(task_ids(&o), vec!["treasure"]);

        let progress = o.provide_outputs("treasure", outputs(&[("result", "gold")])).unwrap();
        assert_eq!(progress, OrchestratorProgress::Finished);
        assert_state(
            &o,
            &[
                ("choose-path", Succeeded),
                ("left-path", Succeeded),
                ("right-path", Skipped),
                ("treasure", Succeeded),
                ("dragon", Skipped),
            ],
        );
    }

    #[test]
    fn test_zig_zag_skip_propagation() {
        let g = graph(
            &["a", "b", "c", "d", "e", "f"],
            &[
                ("a", "context", "b", "context"),
                ("b", "context", "c", "context"),
                ("d", "context", "c", "context"),
                ("d", "context", "e", "context"),
                ("e", "context", "f", "context"),
            ],
        );
        let mut o = Orchestrator::new(build_plan(&g).unwrap());
        assert_eq!(task_ids(&o), vec!["a", "d"]);

        assert_eq!(
            o.provide_outputs("a", outputs(&[("context", "a")])).unwrap(),
            OrchestratorProgress::Working
        );
        assert_eq!(
            o.provide_outputs("d", outputs(&[("context", "d")])).unwrap(),
            OrchestratorProgress::Advanced
        );
        assert_eq!(task_ids(&o), vec!["b", "e"]);

        assert_eq!(
            o.provide_outputs("b", outputs(&[("$error", "failure")])).unwrap(),
            OrchestratorProgress::Working
        );
        assert_eq!(task_ids(&o), vec!["e"]);
        assert_state(
            &o,
            &[
                ("a", Succeeded),
                ("b", Failed),
                ("c", Skipped),
                ("d", Succeeded),
                ("e", Ready),
                ("f", Inactive),
            ],
        );

        assert_eq!(
            o.provide_outputs("e", outputs(&[("context", "e")])).unwrap(),
            OrchestratorProgress::Advanced
        );
        assert_eq!(task_ids(&o), vec!["f"]);
    }

    #[test]
    fn test_unknown_nodes_are_rejected() {
        let mut o = router();
        assert!(matches!(o.set_working("nope"), Err(EngineError::NodeNotFound(_))));
        assert!(matches!(o.set_waiting("nope"), Err(EngineError::NodeNotFound(_))));
        assert!(matches!(o.set_interrupted("nope"), Err(EngineError::NodeNotFound(_))));
        assert!(o.task_from_id("nope").is_err());
    }

    #[test]
    fn test_transitions_outside_lifecycle_are_rejected() {
        let mut o = router();
        assert!(matches!(
            o.set_working("left-path"),
            Err(EngineError::InvalidTransition { from: Inactive, to: Working, .. })
        ));
        assert!(o.set_waiting("left-path").is_err());
        assert!(o.set_interrupted("choose-path").is_err());
        assert_eq!(o.node_state("choose-path"), Some(Ready));

        o.provide_outputs("choose-path", outputs(&[("left", "left")])).unwrap();
        assert!(matches!(
            o.advance("choose-path", Working),
            Err(EngineError::InvalidTransition { from: Succeeded, to: Working, .. })
        ));
        // same state is a no-op
        o.advance("choose-path", Succeeded).unwrap();
    }

    #[test]
    fn test_working_waiting_lifecycle() {
        let mut o = router();
        o.set_working("choose-path").unwrap();
        assert!(task_ids(&o).is_empty());
        assert!(o.is_working());

        o.set_waiting("choose-path").unwrap();
        let err = o
            .provide_outputs("choose-path", outputs(&[("left", "left")]))
            .unwrap_err();
        assert!(matches!(err, EngineError::Orchestration(_)));

        o.set_working("choose-path").unwrap();
        let progress = o.provide_outputs("choose-path", outputs(&[("left", "left")])).unwrap();
        assert_eq!(progress, OrchestratorProgress::Advanced);
        assert_eq!(task_ids(&o), vec!["left-path"]);

        o.set_working("left-path").unwrap();
        o.set_interrupted("left-path").unwrap();
        assert!(task_ids(&o).is_empty());
        assert_state(
            &o,
            &[
                ("choose-path", Succeeded),
                ("left-path", Interrupted),
                ("right-path", Skipped),
                ("treasure", Skipped),
                ("dragon", Skipped),
            ],
        );
    }

    #[test]
    fn test_later_stage_outputs_are_rejected() {
        let mut o = diamond();
        let err = o.provide_outputs("mixer", outputs(&[("result", "x")])).unwrap_err();
        assert!(matches!(err, EngineError::Orchestration(_)));
    }

    #[test]
    fn test_restart_at_node() {
        let mut o = diamond();
        o.provide_outputs("input", outputs(&[("left", "l"), ("right", "r")]))
            .unwrap();
        o.provide_outputs("left-channel", outputs(&[("processed", "l")]))
            .unwrap();
        o.provide_outputs("right-channel", outputs(&[("processed", "r")]))
            .unwrap();
        assert_eq!(task_ids(&o), vec!["mixer"]);

        o.restart_at_node("left-channel").unwrap();
        assert_eq!(o.progress(), OrchestratorProgress::Advanced);
        assert_eq!(task_ids(&o), vec!["left-channel"]);
        assert_state(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Ready),
                ("right-channel", Succeeded),
                ("mixer", Inactive),
            ],
        );

        o.restart_at_node("right-channel").unwrap();
        assert_eq!(task_ids(&o), vec!["left-channel", "right-channel"]);
        // repeating is a no-op
        o.restart_at_node("right-channel").unwrap();
        o.restart_at_node("left-channel").unwrap();
        assert_eq!(task_ids(&o), vec!["left-channel", "right-channel"]);

        o.restart_at_node("input").unwrap();
        assert_eq!(o.progress(), OrchestratorProgress::Initial);
        assert_eq!(task_ids(&o), vec!["input"]);
        assert_state(
            &o,
            &[
                ("input", Ready),
                ("left-channel", Inactive),
                ("right-channel", Inactive),
                ("mixer", Inactive),
            ],
        );
    }

    #[test]
    fn test_failure_skips_idle_siblings() {
        let mut o = converge();
        let progress = o.provide_outputs("start-a", outputs(&[("$error", "a fail")])).unwrap();
        assert_eq!(progress, OrchestratorProgress::Finished);
        // every dependent of the siblings is terminal, so they can't matter
        assert_state(
            &o,
            &[
                ("start-a", Failed),
                ("start-b", Skipped),
                ("start-c", Skipped),
                ("end", Skipped),
            ],
        );
        assert!(o.provide_outputs("start-b", outputs(&[("context", "b")])).is_err());

        o.restart_at_node("start-a").unwrap();
        assert_eq!(o.progress(), OrchestratorProgress::Initial);
        assert_eq!(task_ids(&o), vec!["start-a", "start-b", "start-c"]);
        assert_eq!(o.node_state("end"), Some(Inactive));
    }

    #[test]
    fn test_restart_restores_failed_sibling() {
        let mut o = diamond();
        o.provide_outputs("input", outputs(&[("left", "l"), ("right", "r")]))
            .unwrap();
        o.set_working("left-channel").unwrap();
        o.set_working("right-channel").unwrap();
        o.provide_outputs("right-channel", outputs(&[("$error", "boom")]))
            .unwrap();
        let progress = o
            .provide_outputs("left-channel", outputs(&[("processed", "l")]))
            .unwrap();
        assert_eq!(progress, OrchestratorProgress::Finished);

        o.restart_at_node("left-channel").unwrap();
        assert_eq!(task_ids(&o), vec!["left-channel"]);
        assert_state(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Ready),
                ("right-channel", Failed),
                ("mixer", Skipped),
            ],
        );
    }

    #[test]
    fn test_restart_with_sibling_still_working() {
        let mut o = diamond();
        o.provide_outputs("input", outputs(&[("left", "l"), ("right", "r")]))
            .unwrap();
        o.set_working("left-channel").unwrap();
        o.provide_outputs("right-channel", outputs(&[("$error", "boom")]))
            .unwrap();
        assert!(task_ids(&o).is_empty());
        assert_eq!(o.progress(), OrchestratorProgress::Working);

        o.restart_at_node("right-channel").unwrap();
        assert_state(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Working),
                ("right-channel", Ready),
                ("mixer", Inactive),
            ],
        );

        o.set_working("right-channel").unwrap();
        o.provide_outputs("left-channel", outputs(&[("processed", "l")]))
            .unwrap();
        assert_eq!(o.progress(), OrchestratorProgress::Working);
        o.provide_outputs("right-channel", outputs(&[("processed", "r")]))
            .unwrap();
        assert_eq!(task_ids(&o), vec!["mixer"]);
    }

    #[test]
    fn test_restart_at_stage_beyond_current_fails() {
        let mut o = diamond();
        assert!(o.restart_at_stage(2).is_err());
        o.restart_at_stage(0).unwrap();
        assert_eq!(task_ids(&o), vec!["input"]);
    }

    #[test]
    fn test_abort_interrupts_and_halts() {
        let mut o = diamond();
        o.provide_outputs("input", outputs(&[("left", "l"), ("right", "r")]))
            .unwrap();
        o.set_working("left-channel").unwrap();

        let interrupted = o.abort().unwrap();
        assert_eq!(interrupted, vec!["left-channel".to_string()]);
        assert!(o.is_aborted());
        assert!(task_ids(&o).is_empty());
        assert_state(
            &o,
            &[
                ("input", Succeeded),
                ("left-channel", Interrupted),
                ("right-channel", Skipped),
                ("mixer", Skipped),
            ],
        );
        assert!(o.provide_outputs("right-channel", outputs(&[("processed", "r")])).is_err());

        o.reset();
        assert!(!o.is_aborted());
        assert_eq!(task_ids(&o), vec!["input"]);
        assert_eq!(o.progress(), OrchestratorProgress::Initial);
    }

    #[test]
    fn test_full_state_snapshot() {
        let mut o = diamond();
        o.provide_outputs("input", outputs(&[("left", "l"), ("right", "r")]))
            .unwrap();
        let full = o.full_state();
        assert_eq!(full.len(), 4);
        assert_eq!(full[0].node.id, "input");
        assert_eq!(full[0].outputs, Some(outputs(&[("left", "l"), ("right", "r")])));
        assert_eq!(full[1].stage, 1);
        assert_eq!(full[3].inputs, None);
        assert_eq!(o.current_stage(), 1);
    }

    #[derive(Default)]
    struct Recorder {
        consumer: Mutex<Vec<(String, NodeLifecycleState)>>,
        orchestrator: Mutex<Vec<(String, NodeLifecycleState, bool)>>,
    }

    impl OrchestratorCallbacks for Recorder {
        fn state_changed(&self, state: NodeLifecycleState, info: &PlanNodeInfo) {
            self.consumer.lock().push((info.node.id.clone(), state));
        }

        fn state_changed_by_orchestrator(&self, node_id: &str, state: NodeLifecycleState, error: Option<&NodeValue>) {
            self.orchestrator
                .lock()
                .push((node_id.to_string(), state, error.is_some()));
        }
    }

    #[test]
    fn test_callbacks_distinguish_origin() {
        let recorder = Arc::new(Recorder::default());
        let mut o = router().with_callbacks(recorder.clone());

        o.set_working("choose-path").unwrap();
        o.provide_outputs("choose-path", outputs(&[("$error", "lost")])).unwrap();

        assert_eq!(
            *recorder.consumer.lock(),
            vec![("choose-path".to_string(), Working)]
        );
        let by_orchestrator = recorder.orchestrator.lock();
        assert_eq!(by_orchestrator[0], ("choose-path".to_string(), Failed, true));
        assert!(by_orchestrator[1..]
            .iter()
            .all(|(_, state, error)| *state == Skipped && !error));
        assert_eq!(by_orchestrator.len(), 5);
    }
}
