//! Run configuration
//!
//! Settings a caller can pass to a [`GraphRunner`](crate::GraphRunner),
//! either built in code or loaded from a JSON file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::NodeId;

/// Options controlling a single graph run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunConfig {
    /// Start here instead of at the graph's entry nodes
    pub start: Option<NodeId>,
    /// Finish right after this node completes
    pub stop_after: Option<NodeId>,
    /// Suspend after this many visits; unbounded when `None`
    pub max_steps: Option<usize>,
    /// Check graph structure before a fresh run
    pub validate: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            start: None,
            stop_after: None,
            max_steps: None,
            validate: true,
        }
    }
}

impl RunConfig {
    /// Parse a config from JSON; absent fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a config from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        log::debug!("loaded run config from {:?}", path);
        Ok(config)
    }

    pub fn with_start(mut self, node_id: impl Into<String>) -> Self {
        self.start = Some(node_id.into());
        self
    }

    pub fn with_stop_after(mut self, node_id: impl Into<String>) -> Self {
        self.stop_after = Some(node_id.into());
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }
}
