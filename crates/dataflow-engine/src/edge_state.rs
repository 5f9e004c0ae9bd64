//! Values in flight between nodes
//!
//! Edge state records what each source node has delivered to each target.
//! Regular values queue up per source and are consumed by the target one at
//! a time; values delivered over constant edges are kept and re-read on
//! every visit.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::{Edge, InputValues, NodeId, OutputValues};

/// Delivered values, keyed by target node then source node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeState {
    /// Regular values, consumed once read
    #[serde(default)]
    pub state: BTreeMap<NodeId, BTreeMap<NodeId, VecDeque<OutputValues>>>,
    /// Values from constant edges, never consumed
    #[serde(default)]
    pub constants: BTreeMap<NodeId, BTreeMap<NodeId, OutputValues>>,
}

impl EdgeState {
    /// Create empty edge state
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `outputs` of `node` along the given outgoing edges
    ///
    /// Edges not leaving `node` are ignored. Each target receives one entry
    /// per call, merging every edge between the same pair of nodes.
    pub fn update(&mut self, node: &str, opportunities: &[Edge], outputs: Option<&OutputValues>) {
        let Some(outputs) = outputs else {
            return;
        };

        let mut queued: BTreeMap<&str, OutputValues> = BTreeMap::new();
        let mut constant: BTreeMap<&str, OutputValues> = BTreeMap::new();

        for edge in opportunities.iter().filter(|e| e.from == node) {
            let Some(values) = edge_values(edge, outputs) else {
                continue;
            };
            let target = if edge.constant {
                &mut constant
            } else {
                &mut queued
            };
            target.entry(edge.to.as_str()).or_default().extend(values);
        }

        for (to, values) in queued {
            self.state
                .entry(to.to_string())
                .or_default()
                .entry(node.to_string())
                .or_default()
                .push_back(values);
        }
        for (to, values) in constant {
            self.constants
                .entry(to.to_string())
                .or_default()
                .entry(node.to_string())
                .or_default()
                .extend(values);
        }
    }

    /// Values currently visible to `node`, per source
    ///
    /// Constants come first and are overlaid by the oldest queued value from
    /// the same source. Nothing is consumed.
    pub fn available_outputs(&self, node: &str) -> BTreeMap<NodeId, OutputValues> {
        let mut available: BTreeMap<NodeId, OutputValues> = self
            .constants
            .get(node)
            .cloned()
            .unwrap_or_default();

        if let Some(sources) = self.state.get(node) {
            for (from, queue) in sources {
                if let Some(front) = queue.front() {
                    available
                        .entry(from.clone())
                        .or_default()
                        .extend(front.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
        }
        available
    }

    /// Flattened view of [`available_outputs`](Self::available_outputs)
    pub fn available_inputs(&self, node: &str) -> InputValues {
        self.available_outputs(node)
            .into_values()
            .flatten()
            .collect()
    }

    /// Consume the oldest queued value from every source of `node`
    pub fn use_inputs(&mut self, node: &str) {
        let Some(sources) = self.state.get_mut(node) else {
            return;
        };
        for queue in sources.values_mut() {
            queue.pop_front();
        }
        sources.retain(|_, queue| !queue.is_empty());
        if sources.is_empty() {
            self.state.remove(node);
        }
    }

    /// Sources with queued values still waiting for `node`
    pub fn pending_sources<'a>(&'a self, node: &str) -> impl Iterator<Item = &'a NodeId> + 'a {
        self.state
            .get(node)
            .into_iter()
            .flat_map(|sources| sources.iter())
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(from, _)| from)
    }
}

/// Values an edge carries out of `outputs`, or `None` if it carries nothing
pub(crate) fn edge_values(edge: &Edge, outputs: &OutputValues) -> Option<OutputValues> {
    if edge.is_wildcard() {
        return Some(outputs.clone());
    }
    match (edge.out_port.as_deref(), edge.in_port.as_deref()) {
        (Some(out), Some(input)) => outputs
            .get(out)
            .map(|value| OutputValues::from([(input.to_string(), value.clone())])),
        (None, None) => Some(OutputValues::new()),
        _ => None,
    }
}
