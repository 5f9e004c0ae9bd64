//! Probe that builds a [`PathRegistry`] from a run's events.

use parking_lot::Mutex;

use crate::events::{Probe, ProbeError, ProbeEvent};

use super::path_registry::{PathRegistry, RunEdge, RunEvent};

/// Observes one run and files its events by path
///
/// Hand an `Arc<RunObserver>` to the runner as its probe, then read the
/// registry through [`snapshot`](Self::snapshot).
#[derive(Default)]
pub struct RunObserver {
    registry: Mutex<PathRegistry>,
}

impl RunObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owned copy of the registry as it stands
    pub fn snapshot(&self) -> PathRegistry {
        self.registry.lock().clone()
    }

    fn record(registry: &mut PathRegistry, event: ProbeEvent) {
        match event {
            ProbeEvent::GraphStart {
                path,
                title,
                timestamp,
            } => registry.start_graph(&path, title, timestamp),
            ProbeEvent::GraphEnd { path, timestamp } => {
                if !registry.end_graph(&path, timestamp) && !path.is_empty() {
                    log::warn!("graphend for {:?} without a matching graphstart", path);
                }
            }
            ProbeEvent::Edge {
                path,
                edge,
                value,
                timestamp,
            } => {
                let Some((_, parent)) = path.split_last() else {
                    return;
                };
                registry.add_edge(parent, RunEdge::new(edge, &value, timestamp));
            }
            ProbeEvent::Skip { path, node, .. } => {
                log::debug!("node '{}' skipped at {:?}", node.id, path);
            }
            ProbeEvent::NodeStart {
                path,
                node,
                inputs,
                timestamp,
            } => registry.set_event(RunEvent::new(path, node, inputs, timestamp)),
            ProbeEvent::NodeEnd {
                path,
                outputs,
                timestamp,
                ..
            } => {
                registry.finalize_sidecar(&path, &outputs, timestamp);
                if !registry.complete_event(&path, outputs, timestamp) {
                    log::warn!("nodeend for {:?} without a matching nodestart", path);
                }
            }
            ProbeEvent::Input {
                path,
                node,
                inputs,
                bubbled: true,
                timestamp,
            } => {
                registry.add_sidecar(&[], RunEvent::new(path, node, inputs, timestamp).bubbled());
            }
            ProbeEvent::Output {
                path,
                node,
                outputs,
                bubbled: true,
                timestamp,
            } => {
                registry.add_sidecar(&[], RunEvent::new(path, node, outputs, timestamp).bubbled());
            }
            // the matching nodeend carries the same data
            ProbeEvent::Input { .. } | ProbeEvent::Output { .. } => {}
        }
    }
}

impl Probe for RunObserver {
    fn report(&self, event: ProbeEvent) -> Result<(), ProbeError> {
        Self::record(&mut self.registry.lock(), event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::registry::NodeRegistry;
    use crate::runner::{GraphRunner, RunOutcome};
    use crate::types::{Edge, GraphDescriptor, InputValues, NodeDescriptor, OutputValues};

    fn values(pairs: &[(&str, serde_json::Value)]) -> OutputValues {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn registry() -> Arc<NodeRegistry> {
        let mut registry = NodeRegistry::with_builtins();
        registry.register_sync("upper", |_, inputs| {
            let text = inputs.get("text").and_then(|v| v.as_str()).unwrap_or_default();
            Ok(values(&[("text", json!(text.to_uppercase()))]))
        });
        Arc::new(registry)
    }

    fn ids(events: &[RunEvent]) -> Vec<&str> {
        events.iter().map(|e| e.node.id.as_str()).collect()
    }

    fn linear() -> GraphDescriptor {
        GraphDescriptor::new()
            .with_title("Linear")
            .with_node(NodeDescriptor::new("input", "input"))
            .with_node(NodeDescriptor::new("pass", "passthrough"))
            .with_node(NodeDescriptor::new("output", "output"))
            .with_edge(Edge::wildcard("input", "pass"))
            .with_edge(Edge::wildcard("pass", "output"))
    }

    fn upper_subgraph() -> GraphDescriptor {
        GraphDescriptor::new()
            .with_node(NodeDescriptor::new("in", "input"))
            .with_node(NodeDescriptor::new("up", "upper"))
            .with_node(NodeDescriptor::new("out", "output"))
            .with_edge(Edge::wired("in", "item", "up", "text"))
            .with_edge(Edge::wildcard("up", "out"))
    }

    #[tokio::test]
    async fn test_linear_run_is_recorded() {
        let observer = Arc::new(RunObserver::new());
        let runner = GraphRunner::new(registry()).with_probe(observer.clone());
        runner
            .run(&linear(), values(&[("hello", json!("world"))]))
            .await
            .unwrap();

        let snapshot = observer.snapshot();
        let root = snapshot.root();
        assert_eq!(root.title(), Some("Linear"));
        assert!(root.graph_start().is_some());
        assert!(root.graph_end().is_some());
        assert_eq!(ids(root.events()), vec!["input", "pass", "output"]);
        assert!(root.events().iter().all(RunEvent::is_complete));
        assert_eq!(root.edges().len(), 3);
        assert_eq!(
            root.events()[2].outputs.as_ref(),
            Some(&values(&[("hello", json!("world"))]))
        );
    }

    #[tokio::test]
    async fn test_map_branches_are_nested_runs() {
        let graph = GraphDescriptor::new()
            .with_node(NodeDescriptor::new("input", "input"))
            .with_node(NodeDescriptor::new("each", "map").with_config("board", json!("#branch")))
            .with_node(NodeDescriptor::new("output", "output"))
            .with_edge(Edge::wired("input", "words", "each", "list"))
            .with_edge(Edge::wildcard("each", "output"))
            .with_graph("branch", upper_subgraph());

        let observer = Arc::new(RunObserver::new());
        let runner = GraphRunner::new(registry()).with_probe(observer.clone());
        runner
            .run(&graph, values(&[("words", json!(["a", "b", "c"]))]))
            .await
            .unwrap();

        let snapshot = observer.snapshot();
        assert_eq!(ids(snapshot.events()), vec!["input", "each", "output"]);

        let map = snapshot.find(&[1]).unwrap();
        let branches = map.nested();
        assert_eq!(branches.len(), 3);
        for (k, branch) in branches.iter().enumerate() {
            assert_eq!(branch.path(), &[1, k]);
            assert_eq!(ids(branch.events()), vec!["in", "up", "out"]);
            assert!(branch.graph_end().is_some());
        }
        let last = branches[2].events().last().unwrap();
        assert_eq!(last.outputs.as_ref(), Some(&values(&[("text", json!("C"))])));
    }

    #[tokio::test]
    async fn test_invoke_is_one_nested_run() {
        let graph = GraphDescriptor::new()
            .with_node(NodeDescriptor::new("input", "input"))
            .with_node(NodeDescriptor::new("call", "invoke").with_config("board", json!("#sub")))
            .with_node(NodeDescriptor::new("output", "output"))
            .with_edge(Edge::wildcard("input", "call"))
            .with_edge(Edge::wildcard("call", "output"))
            .with_graph("sub", upper_subgraph());

        let observer = Arc::new(RunObserver::new());
        let runner = GraphRunner::new(registry()).with_probe(observer.clone());
        runner
            .run(&graph, values(&[("item", json!("hi"))]))
            .await
            .unwrap();

        let snapshot = observer.snapshot();
        let call = snapshot.find(&[1]).unwrap();
        let runs = call.nested();
        assert_eq!(runs.len(), 1);
        assert_eq!(ids(runs[0].events()), vec!["in", "up", "out"]);
        assert_eq!(runs[0].edges().len(), 3);
    }

    #[tokio::test]
    async fn test_bubbled_input_becomes_sidecar() {
        let graph = GraphDescriptor::new()
            .with_node(NodeDescriptor::new("call", "invoke").with_config("board", json!("#sub")))
            .with_node(NodeDescriptor::new("output", "output"))
            .with_edge(Edge::wildcard("call", "output"))
            .with_graph("sub", upper_subgraph());

        let observer = Arc::new(RunObserver::new());
        let runner = GraphRunner::new(registry()).with_probe(observer.clone());
        let outcome = runner.run(&graph, InputValues::new()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::NeedsInput { .. }));

        let snapshot = observer.snapshot();
        let call = snapshot.find(&[0]).unwrap();
        assert_eq!(call.sidecars().len(), 1);
        let sidecar = &call.sidecars()[0];
        assert!(sidecar.bubbled);
        assert_eq!(sidecar.path, vec![0, 0]);
        assert!(!sidecar.is_complete());
        assert_eq!(ids(snapshot.events()), vec!["in", "call"]);
        assert_eq!(snapshot.pending_sidecars(), vec![[0usize, 0].as_slice()]);
    }

    #[tokio::test]
    async fn test_answered_input_records_output_sidecar() {
        let observer = Arc::new(RunObserver::new());
        let runner = GraphRunner::new(registry()).with_probe(observer.clone());
        let graph = linear();
        let RunOutcome::NeedsInput { mut checkpoint, .. } =
            runner.run(&graph, InputValues::new()).await.unwrap()
        else {
            panic!("expected an input request");
        };
        assert_eq!(observer.snapshot().pending_sidecars(), vec![[0usize].as_slice()]);

        let answer = values(&[("hello", json!("world"))]);
        checkpoint.provide(answer.clone());
        runner.resume(&graph, checkpoint).await.unwrap();

        let snapshot = observer.snapshot();
        assert!(snapshot.pending_sidecars().is_empty());
        let input = snapshot.find(&[0]).unwrap();
        let sidecars = input.sidecars();
        assert_eq!(sidecars.len(), 2);
        assert!(sidecars.iter().all(|s| s.bubbled && s.is_complete()));
        assert_eq!(sidecars[1].outputs.as_ref(), Some(&answer));
        assert!(snapshot.root().events().iter().all(RunEvent::is_complete));
    }

    #[test]
    fn test_nodeend_finalizes_sidecar() {
        let observer = RunObserver::new();
        let now = Utc::now();
        let node = NodeDescriptor::new("ask", "input");
        let answer = values(&[("text", json!("yes"))]);

        let events = [
            ProbeEvent::GraphStart {
                path: vec![],
                title: None,
                timestamp: now,
            },
            ProbeEvent::NodeStart {
                path: vec![0],
                node: node.clone(),
                inputs: InputValues::new(),
                timestamp: now,
            },
            ProbeEvent::Input {
                path: vec![0],
                node: node.clone(),
                inputs: InputValues::new(),
                bubbled: true,
                timestamp: now,
            },
            ProbeEvent::NodeEnd {
                path: vec![0],
                node,
                inputs: InputValues::new(),
                outputs: answer.clone(),
                timestamp: now,
            },
        ];
        for event in events {
            observer.report(event).unwrap();
        }

        let snapshot = observer.snapshot();
        assert!(snapshot.pending_sidecars().is_empty());
        let flat = snapshot.events();
        assert_eq!(flat.len(), 2);
        assert!(flat[0].bubbled);
        assert!(flat.iter().all(RunEvent::is_complete));
        assert_eq!(flat[1].outputs.as_ref(), Some(&answer));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let observer = RunObserver::new();
        let before = observer.snapshot();
        observer
            .report(ProbeEvent::NodeStart {
                path: vec![0],
                node: NodeDescriptor::new("a", "passthrough"),
                inputs: InputValues::new(),
                timestamp: Utc::now(),
            })
            .unwrap();

        assert!(before.events().is_empty());
        assert_eq!(observer.snapshot().events().len(), 1);
    }
}
