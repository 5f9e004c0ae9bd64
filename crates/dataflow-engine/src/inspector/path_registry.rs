//! Tree of run events keyed by invocation path.
//!
//! Every invocation in a run has a path: `[k]` for the k-th node visited at
//! the top level, `[k, j]` for the j-th node of a sub-graph the k-th node
//! ran, `[k, b, j]` for the j-th node of branch `b` of a map, and so on.
//! The registry keeps one [`PathRegistryEntry`] per path so the events of
//! each nesting level can be read separately from the flat probe stream.

use std::cell::OnceCell;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Edge, InputValues, NodeDescriptor, OutputValues};

/// One node invocation as seen by an observer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    pub id: String,
    pub path: Vec<usize>,
    pub node: NodeDescriptor,
    pub start: DateTime<Utc>,
    /// Set once the invocation (or, for a sidecar, its answer) completes
    pub end: Option<DateTime<Utc>>,
    pub inputs: InputValues,
    pub outputs: Option<OutputValues>,
    /// Raised by a bubble rather than by a node start
    pub bubbled: bool,
}

impl RunEvent {
    pub fn new(
        path: Vec<usize>,
        node: NodeDescriptor,
        inputs: InputValues,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            id: event_id(&path),
            path,
            node,
            start,
            end: None,
            inputs,
            outputs: None,
            bubbled: false,
        }
    }

    pub fn bubbled(mut self) -> Self {
        self.bubbled = true;
        self
    }

    pub fn is_complete(&self) -> bool {
        self.end.is_some()
    }
}

fn event_id(path: &[usize]) -> String {
    let parts: Vec<String> = path.iter().map(ToString::to_string).collect();
    format!("e-{}", parts.join("-"))
}

/// An edge traversed on the way to a visit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEdge {
    pub edge: Edge,
    /// Only the value this edge delivered
    pub value: Option<InputValues>,
    pub timestamp: DateTime<Utc>,
}

impl RunEdge {
    /// Record `edge`, keeping only the part of `inputs` it carried
    pub fn new(edge: Edge, inputs: &InputValues, timestamp: DateTime<Utc>) -> Self {
        let value = match (edge.out_port.as_deref(), edge.in_port.as_deref()) {
            (None, None) => None,
            (_, Some(port)) => inputs.get(port).map(|v| {
                let mut carried = InputValues::new();
                carried.insert(port.to_string(), v.clone());
                carried
            }),
            (Some(_), None) => Some(inputs.clone()),
        };
        Self {
            edge,
            value,
            timestamp,
        }
    }
}

/// One level of the registry tree
///
/// `events` is a cached flattening of the children. The cache is dropped on
/// every mutation that passes through this entry and rebuilt on next read.
#[derive(Debug, Clone, Default)]
pub struct PathRegistryEntry {
    path: Vec<usize>,
    children: Vec<Option<PathRegistryEntry>>,
    event: Option<RunEvent>,
    sidecars: Vec<RunEvent>,
    edges: Vec<RunEdge>,
    title: Option<String>,
    graph_start: Option<DateTime<Utc>>,
    graph_end: Option<DateTime<Utc>>,
    events: OnceCell<Vec<RunEvent>>,
}

impl PathRegistryEntry {
    fn at(path: Vec<usize>) -> Self {
        Self {
            path,
            ..Self::default()
        }
    }

    pub fn path(&self) -> &[usize] {
        &self.path
    }

    /// The invocation recorded at this path, if any
    pub fn event(&self) -> Option<&RunEvent> {
        self.event.as_ref()
    }

    pub fn sidecars(&self) -> &[RunEvent] {
        &self.sidecars
    }

    /// Edges traversed by the run this entry owns
    pub fn edges(&self) -> &[RunEdge] {
        &self.edges
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn graph_start(&self) -> Option<DateTime<Utc>> {
        self.graph_start
    }

    pub fn graph_end(&self) -> Option<DateTime<Utc>> {
        self.graph_end
    }

    pub fn child(&self, index: usize) -> Option<&PathRegistryEntry> {
        self.children.get(index).and_then(Option::as_ref)
    }

    /// Existing children in index order
    pub fn children(&self) -> impl Iterator<Item = &PathRegistryEntry> {
        self.children.iter().flatten()
    }

    /// Whether `events` has to be recomputed on next read
    pub fn is_dirty(&self) -> bool {
        self.events.get().is_none()
    }

    /// Each child's sidecars followed by its event, in child order
    pub fn events(&self) -> &[RunEvent] {
        self.events.get_or_init(|| {
            let mut events = Vec::new();
            for child in self.children() {
                events.extend(child.sidecars.iter().cloned());
                events.extend(child.event.iter().cloned());
            }
            events
        })
    }

    /// The runs nested under this entry
    ///
    /// An entry whose children carry events is a single run. One whose
    /// children are bare containers, as with the branches of a map, holds
    /// one run per child.
    pub fn nested(&self) -> Vec<&PathRegistryEntry> {
        if !self.events().is_empty() {
            return vec![self];
        }
        self.children().collect()
    }

    fn mark_dirty(&mut self) {
        self.events.take();
    }
}

/// Registry of one run's entries
#[derive(Debug, Clone, Default)]
pub struct PathRegistry {
    root: PathRegistryEntry,
    /// Pending sidecars: event path to the path of the entry holding it
    tracked: BTreeMap<Vec<usize>, Vec<usize>>,
}

impl PathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for the top-level run
    pub fn root(&self) -> &PathRegistryEntry {
        &self.root
    }

    /// Look up an entry without creating anything
    pub fn find(&self, path: &[usize]) -> Option<&PathRegistryEntry> {
        let mut entry = &self.root;
        for index in path {
            entry = entry.child(*index)?;
        }
        Some(entry)
    }

    /// Get the entry at `path`, creating it and any missing ancestors
    pub fn create(&mut self, path: &[usize]) -> &mut PathRegistryEntry {
        let mut entry = &mut self.root;
        for (depth, index) in path.iter().enumerate() {
            entry.mark_dirty();
            if entry.children.len() <= *index {
                entry.children.resize_with(index + 1, || None);
            }
            entry = entry.children[*index]
                .get_or_insert_with(|| PathRegistryEntry::at(path[..=depth].to_vec()));
        }
        entry.mark_dirty();
        entry
    }

    fn find_mut(&mut self, path: &[usize]) -> Option<&mut PathRegistryEntry> {
        let mut entry = &mut self.root;
        for index in path {
            entry.mark_dirty();
            entry = entry.children.get_mut(*index)?.as_mut()?;
        }
        entry.mark_dirty();
        Some(entry)
    }

    /// Record the start of the run owned by `path`
    pub fn start_graph(&mut self, path: &[usize], title: Option<String>, timestamp: DateTime<Utc>) {
        let entry = self.create(path);
        entry.title = title;
        entry.graph_start = Some(timestamp);
        entry.graph_end = None;
    }

    /// Record the end of the run owned by `path`
    ///
    /// Returns false when no such run was started.
    pub fn end_graph(&mut self, path: &[usize], timestamp: DateTime<Utc>) -> bool {
        match self.find_mut(path) {
            Some(entry) => {
                entry.graph_end = Some(timestamp);
                true
            }
            None => false,
        }
    }

    /// Record an edge under the run owned by `path`
    pub fn add_edge(&mut self, path: &[usize], edge: RunEdge) {
        self.create(path).edges.push(edge);
    }

    /// Set the invocation at `event.path`, replacing an earlier one
    pub fn set_event(&mut self, event: RunEvent) {
        let path = event.path.clone();
        self.create(&path).event = Some(event);
    }

    /// Complete the invocation at `path`
    ///
    /// Returns false when nothing was started there.
    pub fn complete_event(
        &mut self,
        path: &[usize],
        outputs: OutputValues,
        timestamp: DateTime<Utc>,
    ) -> bool {
        let Some(event) = self.find_mut(path).and_then(|entry| entry.event.as_mut()) else {
            return false;
        };
        event.outputs = Some(outputs);
        event.end = Some(timestamp);
        true
    }

    /// Record an event with no terminal counterpart yet
    ///
    /// The sidecar is held by the last child of the entry at `path`, or by
    /// that entry itself when it has no children. It stays pending under
    /// its own path until [`finalize_sidecar`](Self::finalize_sidecar).
    pub fn add_sidecar(&mut self, path: &[usize], event: RunEvent) {
        let entry = self.create(path);
        let holder = match entry.children.iter().rposition(Option::is_some) {
            Some(last) => {
                let mut holder = path.to_vec();
                holder.push(last);
                holder
            }
            None => path.to_vec(),
        };
        self.tracked.insert(event.path.clone(), holder.clone());
        self.create(&holder).sidecars.push(event);
    }

    /// Complete every pending sidecar at `path` or below it
    ///
    /// Returns how many were completed.
    pub fn finalize_sidecar(
        &mut self,
        path: &[usize],
        outputs: &OutputValues,
        timestamp: DateTime<Utc>,
    ) -> usize {
        let keys: Vec<Vec<usize>> = self
            .tracked
            .keys()
            .filter(|key| key.starts_with(path))
            .cloned()
            .collect();

        let mut finalized = 0;
        for key in keys {
            let Some(holder) = self.tracked.remove(&key) else {
                continue;
            };
            let entry = self.create(&holder);
            for sidecar in entry
                .sidecars
                .iter_mut()
                .filter(|s| s.path == key && !s.is_complete())
            {
                sidecar.end = Some(timestamp);
                if sidecar.outputs.is_none() {
                    sidecar.outputs = Some(outputs.clone());
                }
                finalized += 1;
            }
        }
        finalized
    }

    /// Paths of sidecars still waiting to be finalized
    pub fn pending_sidecars(&self) -> Vec<&[usize]> {
        self.tracked.keys().map(Vec::as_slice).collect()
    }

    /// Top-level events, flattened
    pub fn events(&self) -> &[RunEvent] {
        self.root.events()
    }
}
