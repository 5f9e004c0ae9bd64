//! Topological leveling of a graph into stages.

use std::collections::{BTreeSet, HashMap};

use crate::error::{EngineError, Result};
use crate::types::{GraphDescriptor, NodeId};

use super::types::{OrchestrationPlan, PlanNodeInfo};

/// Level an acyclic graph into stages.
///
/// Each pass collects every unplaced node whose upstream nodes are all
/// placed in earlier stages. Nodes keep their declaration order within a
/// stage. A cycle (self-loops included) is rejected; condensing cycles is
/// up to the caller.
pub fn build_plan(graph: &GraphDescriptor) -> Result<OrchestrationPlan> {
    for edge in &graph.edges {
        for id in [&edge.from, &edge.to] {
            if graph.find_node(id).is_none() {
                return Err(EngineError::NodeNotFound(id.clone()));
            }
        }
    }

    let dependencies: HashMap<&str, BTreeSet<&str>> = graph
        .nodes
        .iter()
        .map(|node| {
            let upstream = graph.incoming_edges(&node.id).map(|e| e.from.as_str()).collect();
            (node.id.as_str(), upstream)
        })
        .collect();

    let mut placed: HashMap<&str, usize> = HashMap::new();
    let mut remaining: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut stages: Vec<Vec<PlanNodeInfo>> = Vec::new();

    while !remaining.is_empty() {
        let stage = stages.len();
        let (ready, blocked): (Vec<&str>, Vec<&str>) = remaining.iter().partition(|id| {
            dependencies
                .get(*id)
                .is_some_and(|deps| deps.iter().all(|dep| placed.get(dep).is_some_and(|s| *s < stage)))
        });

        if ready.is_empty() {
            let cycle: Vec<NodeId> = blocked.iter().map(|id| id.to_string()).collect();
            log::warn!("cannot plan graph; cycle among {:?}", cycle);
            return Err(EngineError::CycleDetected(cycle));
        }

        let mut infos = Vec::with_capacity(ready.len());
        for id in &ready {
            placed.insert(*id, stage);
            let node = graph
                .find_node(id)
                .ok_or_else(|| EngineError::NodeNotFound(id.to_string()))?;
            infos.push(PlanNodeInfo {
                node: node.clone(),
                upstream: graph.incoming_edges(id).cloned().collect(),
                downstream: graph.outgoing_edges(id).cloned().collect(),
            });
        }
        stages.push(infos);
        remaining = blocked;
    }

    log::debug!("planned {} nodes into {} stages", graph.nodes.len(), stages.len());
    Ok(OrchestrationPlan { stages })
}
