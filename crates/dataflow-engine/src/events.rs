//! Probe events for observing a run
//!
//! The runner reports what it does to a [`Probe`] as timestamped events.
//! Every event carries the path of the invocation it concerns, so observers
//! can rebuild the nesting of sub-graph runs without access to the runner's
//! internals.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Edge, InputValues, NodeDescriptor, OutputValues};

/// Trait for receiving probe events
///
/// Implementations must be cheap and non-blocking; the runner calls
/// `report` inline between steps.
pub trait Probe: Send + Sync {
    /// Report an event
    ///
    /// Returns an error if the event could not be delivered. The runner logs
    /// such errors and carries on.
    fn report(&self, event: ProbeEvent) -> Result<(), ProbeError>;
}

/// Error when delivering an event fails
#[derive(Debug, Clone, Error)]
#[error("Probe error: {message}")]
pub struct ProbeError {
    pub message: String,
}

/// Events emitted while a graph runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProbeEvent {
    /// A graph run started
    #[serde(rename_all = "camelCase")]
    GraphStart {
        path: Vec<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// An opportunity led to the visit at `path`
    #[serde(rename_all = "camelCase")]
    Edge {
        path: Vec<usize>,
        edge: Edge,
        value: InputValues,
        timestamp: DateTime<Utc>,
    },

    /// A node was skipped
    #[serde(rename_all = "camelCase")]
    Skip {
        path: Vec<usize>,
        node: NodeDescriptor,
        inputs: InputValues,
        missing_inputs: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A node invocation started
    #[serde(rename_all = "camelCase")]
    NodeStart {
        path: Vec<usize>,
        node: NodeDescriptor,
        inputs: InputValues,
        timestamp: DateTime<Utc>,
    },

    /// A node invocation completed
    #[serde(rename_all = "camelCase")]
    NodeEnd {
        path: Vec<usize>,
        node: NodeDescriptor,
        inputs: InputValues,
        outputs: OutputValues,
        timestamp: DateTime<Utc>,
    },

    /// A graph run ended
    #[serde(rename_all = "camelCase")]
    GraphEnd {
        path: Vec<usize>,
        timestamp: DateTime<Utc>,
    },

    /// A node asked for input from outside the run
    #[serde(rename_all = "camelCase")]
    Input {
        path: Vec<usize>,
        node: NodeDescriptor,
        inputs: InputValues,
        bubbled: bool,
        timestamp: DateTime<Utc>,
    },

    /// A node handed outputs to the outside of the run
    #[serde(rename_all = "camelCase")]
    Output {
        path: Vec<usize>,
        node: NodeDescriptor,
        outputs: OutputValues,
        bubbled: bool,
        timestamp: DateTime<Utc>,
    },
}

impl ProbeEvent {
    /// Path of the invocation this event concerns
    pub fn path(&self) -> &[usize] {
        match self {
            Self::GraphStart { path, .. }
            | Self::Edge { path, .. }
            | Self::Skip { path, .. }
            | Self::NodeStart { path, .. }
            | Self::NodeEnd { path, .. }
            | Self::GraphEnd { path, .. }
            | Self::Input { path, .. }
            | Self::Output { path, .. } => path,
        }
    }

    /// When the event happened
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::GraphStart { timestamp, .. }
            | Self::Edge { timestamp, .. }
            | Self::Skip { timestamp, .. }
            | Self::NodeStart { timestamp, .. }
            | Self::NodeEnd { timestamp, .. }
            | Self::GraphEnd { timestamp, .. }
            | Self::Input { timestamp, .. }
            | Self::Output { timestamp, .. } => *timestamp,
        }
    }

    /// Event name as it appears in the serialized `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GraphStart { .. } => "graphstart",
            Self::Edge { .. } => "edge",
            Self::Skip { .. } => "skip",
            Self::NodeStart { .. } => "nodestart",
            Self::NodeEnd { .. } => "nodeend",
            Self::GraphEnd { .. } => "graphend",
            Self::Input { .. } => "input",
            Self::Output { .. } => "output",
        }
    }
}

/// A no-op probe for when events aren't needed
pub struct NullProbe;

impl Probe for NullProbe {
    fn report(&self, _event: ProbeEvent) -> Result<(), ProbeError> {
        Ok(())
    }
}

/// A probe that collects events into a vector (useful for testing)
#[derive(Default)]
pub struct VecProbe {
    events: Mutex<Vec<ProbeEvent>>,
}

impl VecProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of collected events
    pub fn events(&self) -> Vec<ProbeEvent> {
        self.events.lock().clone()
    }

    /// Event kinds in arrival order
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(ProbeEvent::kind).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Probe for VecProbe {
    fn report(&self, event: ProbeEvent) -> Result<(), ProbeError> {
        self.events.lock().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_probe_collects_in_order() {
        let probe = VecProbe::new();
        let now = Utc::now();
        probe
            .report(ProbeEvent::GraphStart {
                path: vec![],
                title: None,
                timestamp: now,
            })
            .unwrap();
        probe
            .report(ProbeEvent::GraphEnd {
                path: vec![],
                timestamp: now,
            })
            .unwrap();

        assert_eq!(probe.kinds(), vec!["graphstart", "graphend"]);
        probe.clear();
        assert!(probe.events().is_empty());
    }

    #[test]
    fn test_event_type_tag_uses_probe_vocabulary() {
        let event = ProbeEvent::NodeStart {
            path: vec![2, 0, 1],
            node: NodeDescriptor::new("n", "passthrough"),
            inputs: InputValues::new(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "nodestart");
        assert_eq!(value["path"], serde_json::json!([2, 0, 1]));
        assert_eq!(event.path(), &[2, 0, 1]);
    }

    #[test]
    fn test_null_probe() {
        let probe = NullProbe;
        let result = probe.report(ProbeEvent::GraphEnd {
            path: vec![0],
            timestamp: Utc::now(),
        });
        assert!(result.is_ok());
    }
}
