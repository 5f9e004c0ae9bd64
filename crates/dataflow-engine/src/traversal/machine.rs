use std::collections::{BTreeSet, VecDeque};

use crate::edge_state::EdgeState;
use crate::error::{EngineError, Result};
use crate::registry::NodeRegistry;
use crate::types::{Edge, GraphDescriptor, InputValues, NodeDescriptor, NodeId, OutputValues, ERROR_PORT};

use super::result::TraversalResult;

enum Cursor {
    Start {
        opportunities: VecDeque<Edge>,
        state: EdgeState,
    },
    At(TraversalResult),
    Done,
}

/// Step-wise walk over a graph
///
/// Each call to [`next_result`](Self::next_result) settles the previous
/// visit (consuming its inputs and forwarding its outputs) and yields the
/// next node. The caller fills in `outputs` on a yielded result before
/// asking for the next one; a result left without outputs counts as a node
/// that produced nothing.
pub struct Traversal<'a> {
    graph: &'a GraphDescriptor,
    registry: &'a NodeRegistry,
    cursor: Cursor,
}

impl<'a> Traversal<'a> {
    /// Start at the graph's entry nodes
    pub fn new(graph: &'a GraphDescriptor, registry: &'a NodeRegistry) -> Self {
        let opportunities = graph.entries().into_iter().map(|n| Edge::entry(&n.id)).collect();
        Self {
            graph,
            registry,
            cursor: Cursor::Start {
                opportunities,
                state: EdgeState::new(),
            },
        }
    }

    /// Start at a designated node
    pub fn starting_at(graph: &'a GraphDescriptor, registry: &'a NodeRegistry, node_id: &str) -> Result<Self> {
        if graph.find_node(node_id).is_none() {
            return Err(EngineError::NodeNotFound(node_id.to_string()));
        }
        Ok(Self {
            graph,
            registry,
            cursor: Cursor::Start {
                opportunities: VecDeque::from([Edge::entry(node_id)]),
                state: EdgeState::new(),
            },
        })
    }

    /// Continue from a previously yielded result
    pub fn resume(graph: &'a GraphDescriptor, registry: &'a NodeRegistry, result: TraversalResult) -> Self {
        Self {
            graph,
            registry,
            cursor: Cursor::At(result),
        }
    }

    /// The most recently yielded result
    pub fn current(&self) -> Option<&TraversalResult> {
        match &self.cursor {
            Cursor::At(result) => Some(result),
            _ => None,
        }
    }

    /// Mutable access to the most recently yielded result
    pub fn current_mut(&mut self) -> Option<&mut TraversalResult> {
        match &mut self.cursor {
            Cursor::At(result) => Some(result),
            _ => None,
        }
    }

    /// Set the outputs of the most recently yielded result
    pub fn complete(&mut self, outputs: OutputValues) {
        if let Cursor::At(result) = &mut self.cursor {
            result.outputs = Some(outputs);
        }
    }

    /// Take the most recently yielded result
    pub fn into_current(self) -> Option<TraversalResult> {
        match self.cursor {
            Cursor::At(result) => Some(result),
            _ => None,
        }
    }

    /// Advance to the next node
    ///
    /// Returns `Ok(None)` once no opportunities remain. An unknown node type
    /// is the only error.
    pub fn next_result(&mut self) -> Result<Option<&mut TraversalResult>> {
        let (mut opportunities, state, skipped) = match std::mem::replace(&mut self.cursor, Cursor::Done) {
            Cursor::Start { opportunities, state } => (opportunities, state, BTreeSet::new()),
            Cursor::At(result) => self.settle(result),
            Cursor::Done => return Ok(None),
        };

        let Some(current) = opportunities.pop_front() else {
            log::debug!("traversal exhausted");
            return Ok(None);
        };

        self.cursor = Cursor::At(self.visit(current, opportunities, state, skipped)?);
        match &mut self.cursor {
            Cursor::At(result) => Ok(Some(result)),
            _ => Ok(None),
        }
    }

    fn visit(
        &self,
        current: Edge,
        opportunities: VecDeque<Edge>,
        state: EdgeState,
        skipped: BTreeSet<NodeId>,
    ) -> Result<TraversalResult> {
        let descriptor = self
            .graph
            .find_node(&current.to)
            .ok_or_else(|| EngineError::NodeNotFound(current.to.clone()))?
            .clone();

        if !self.registry.has_node_type(&descriptor.node_type) {
            return Err(EngineError::UnknownNodeType {
                node_id: descriptor.id,
                node_type: descriptor.node_type,
            });
        }

        let mut inputs = descriptor.configuration.clone();
        inputs.extend(state.available_inputs(&descriptor.id));

        let incoming: Vec<&Edge> = self.graph.incoming_edges(&descriptor.id).collect();
        let missing_inputs = self.missing_inputs(&descriptor, &incoming, &inputs);
        let skip = (!missing_inputs.is_empty() && incoming.iter().any(|e| !e.optional))
            || feeders_skipped(&incoming, &skipped, &state, &descriptor.id);
        let new_opportunities = self.graph.outgoing_edges(&descriptor.id).cloned().collect();

        log::debug!(
            "visit '{}' ({}) from '{}'{}",
            descriptor.id,
            descriptor.node_type,
            current.from,
            if skip { ", skipping" } else { "" }
        );

        Ok(TraversalResult {
            descriptor,
            current,
            inputs,
            missing_inputs,
            opportunities,
            new_opportunities,
            state,
            skipped,
            outputs: None,
            skip,
        })
    }

    /// Required inputs (wired or declared) absent from `inputs`, sorted
    fn missing_inputs(
        &self,
        descriptor: &NodeDescriptor,
        incoming: &[&Edge],
        inputs: &InputValues,
    ) -> Vec<String> {
        let mut required: BTreeSet<String> = incoming
            .iter()
            .filter_map(|e| e.required_port())
            .map(str::to_string)
            .collect();
        if let Some(description) = self.registry.describe(descriptor) {
            required.extend(description.required_inputs().map(str::to_string));
        }
        required.into_iter().filter(|name| !inputs.contains_key(name)).collect()
    }

    /// Fold a finished visit back into the frontier and edge state
    fn settle(&self, result: TraversalResult) -> (VecDeque<Edge>, EdgeState, BTreeSet<NodeId>) {
        let TraversalResult {
            descriptor,
            missing_inputs,
            mut opportunities,
            new_opportunities,
            mut state,
            mut skipped,
            outputs,
            skip,
            ..
        } = result;
        let id = descriptor.id.as_str();

        if skip {
            let is_final = missing_inputs.is_empty()
                || self.skip_is_final(id, &missing_inputs, &opportunities, &skipped);
            if !skipped.contains(id) && is_final {
                log::debug!("skip of '{}' propagates downstream", id);
                skipped.insert(id.to_string());
                for edge in new_opportunities {
                    push_opportunity(&mut opportunities, edge);
                }
            }
            return (opportunities, state, skipped);
        }

        state.use_inputs(id);
        skipped.remove(id);

        let (outputs, routed) = route_outputs(id, outputs.unwrap_or_default(), new_opportunities);
        state.update(id, &routed, Some(&outputs));
        for edge in routed {
            push_opportunity(&mut opportunities, edge);
        }

        // values still queued for this node need another visit
        if let Some(source) = state.pending_sources(id).next() {
            if let Some(edge) = self.graph.incoming_edges(id).find(|e| &e.from == source) {
                push_opportunity(&mut opportunities, edge.clone());
            }
        }

        (opportunities, state, skipped)
    }

    /// Whether some missing input can no longer arrive
    ///
    /// A port is dead when every non-optional edge feeding it comes from a
    /// skipped node or from a node that no pending opportunity can reach.
    /// Wildcard edges feed every port.
    fn skip_is_final(
        &self,
        node_id: &str,
        missing_inputs: &[String],
        pending: &VecDeque<Edge>,
        skipped: &BTreeSet<NodeId>,
    ) -> bool {
        let reachable = reachable_from(self.graph, pending);
        missing_inputs.iter().any(|port| {
            self.graph
                .incoming_edges(node_id)
                .filter(|e| !e.optional)
                .filter(|e| e.is_wildcard() || e.in_port.as_deref() == Some(port.as_str()))
                .all(|e| skipped.contains(&e.from) || !reachable.contains(e.from.as_str()))
        })
    }
}

/// Whether every non-optional edge into `node` comes from a skipped node
/// that left nothing queued for it
fn feeders_skipped(incoming: &[&Edge], skipped: &BTreeSet<NodeId>, state: &EdgeState, node: &str) -> bool {
    let available = state.available_outputs(node);
    let mut required = incoming.iter().filter(|e| !e.optional).peekable();
    required.peek().is_some()
        && required.all(|e| skipped.contains(&e.from) && !available.contains_key(&e.from))
}

/// Queue an opportunity unless its target is already waiting
fn push_opportunity(opportunities: &mut VecDeque<Edge>, edge: Edge) {
    if !opportunities.iter().any(|e| e.to == edge.to) {
        opportunities.push_back(edge);
    }
}

/// Apply the `$error` convention to a node's outputs
///
/// When `$error` is present every sibling output is dropped and only the
/// first edge able to carry it survives.
fn route_outputs(node_id: &str, outputs: OutputValues, edges: Vec<Edge>) -> (OutputValues, Vec<Edge>) {
    let Some(error) = outputs.get(ERROR_PORT).cloned() else {
        return (outputs, edges);
    };
    let consumer = edges.into_iter().find(Edge::accepts_error);
    if consumer.is_none() {
        log::warn!("node '{}' produced {} with no consumer; branch ends", node_id, ERROR_PORT);
    }
    (
        OutputValues::from([(ERROR_PORT.to_string(), error)]),
        consumer.into_iter().collect(),
    )
}

/// Nodes reachable from the targets of pending opportunities
fn reachable_from<'g>(graph: &'g GraphDescriptor, pending: &VecDeque<Edge>) -> BTreeSet<&'g str> {
    let mut seen = BTreeSet::new();
    let mut frontier: Vec<&'g str> = pending
        .iter()
        .filter_map(|e| graph.find_node(&e.to).map(|n| n.id.as_str()))
        .collect();
    while let Some(id) = frontier.pop() {
        if seen.insert(id) {
            frontier.extend(graph.outgoing_edges(id).map(|e| e.to.as_str()));
        }
    }
    seen
}
