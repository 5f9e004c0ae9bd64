//! Persisted run checkpoints
//!
//! A [`Checkpoint`] is the state a suspended run needs to continue: the
//! traversal result it stopped at plus the run-level bookkeeping around it.
//! [`CheckpointStore`] keeps checkpoints by run id, in memory and optionally
//! on disk as zstd-compressed JSON.
//!
//! # Example
//!
//! ```ignore
//! use dataflow_engine::{CheckpointStore, RunOutcome};
//!
//! let mut store = CheckpointStore::with_persistence("/var/lib/runs");
//! if let RunOutcome::NeedsInput { checkpoint, .. } = runner.run(&graph, inputs).await? {
//!     store.save("run-42", &checkpoint)?;
//! }
//! // later, possibly in another process
//! let mut checkpoint = store.load("run-42")?.expect("checkpoint");
//! checkpoint.provide(answer);
//! let outcome = runner.resume(&graph, checkpoint).await?;
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::traversal::TraversalResult;
use crate::types::{InputValues, OutputValues};

/// Compression level for checkpoint files
const COMPRESSION_LEVEL: i32 = 3;

/// File extension for persisted checkpoints
const CHECKPOINT_EXTENSION: &str = "checkpoint";

/// Where a suspended run stopped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// The traversal result the run stopped at
    pub result: TraversalResult,
    /// Invocation index of `result` within its run
    pub index: usize,
    /// Outputs collected before suspension
    #[serde(default)]
    pub outputs: OutputValues,
    /// Inputs the run was started with
    #[serde(default)]
    pub run_inputs: InputValues,
    /// Whether the stopped node was answered through [`provide`](Self::provide)
    #[serde(default)]
    pub provided: bool,
}

impl Checkpoint {
    /// ID of the node the run stopped at
    pub fn node_id(&self) -> &str {
        self.result.node_id()
    }

    /// Complete the stopped node with externally supplied outputs
    pub fn provide(&mut self, values: OutputValues) {
        self.result.outputs = Some(values);
        self.provided = true;
    }

    /// Whether the stopped node still has to be invoked on resume
    pub fn is_pending(&self) -> bool {
        !self.result.skip && !self.result.is_complete()
    }
}

/// Checkpoint storage keyed by run id
pub struct CheckpointStore {
    /// Compressed checkpoints
    checkpoints: HashMap<String, Vec<u8>>,
    /// Directory for persistence (if any)
    persist_dir: Option<PathBuf>,
}

impl CheckpointStore {
    /// Create an in-memory store (no persistence)
    pub fn new() -> Self {
        Self {
            checkpoints: HashMap::new(),
            persist_dir: None,
        }
    }

    /// Create a store that also writes checkpoints to `dir`
    pub fn with_persistence(dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoints: HashMap::new(),
            persist_dir: Some(dir.into()),
        }
    }

    /// Store a checkpoint under `run_id`, replacing any previous one
    pub fn save(&mut self, run_id: &str, checkpoint: &Checkpoint) -> Result<()> {
        let bytes = compress(checkpoint)?;

        if let Some(dir) = &self.persist_dir {
            std::fs::create_dir_all(dir)?;
            let path = checkpoint_path(dir, run_id);
            std::fs::write(&path, &bytes)?;
            log::debug!("saved checkpoint for run '{}' to {:?}", run_id, path);
        }

        self.checkpoints.insert(run_id.to_string(), bytes);
        Ok(())
    }

    /// Load the checkpoint for `run_id`, reading from disk if needed
    pub fn load(&mut self, run_id: &str) -> Result<Option<Checkpoint>> {
        if let Some(bytes) = self.checkpoints.get(run_id) {
            return decompress(bytes).map(Some);
        }

        let Some(dir) = &self.persist_dir else {
            return Ok(None);
        };
        let path = checkpoint_path(dir, run_id);
        if !path.exists() {
            return Ok(None);
        }

        let bytes = std::fs::read(&path)?;
        let checkpoint = decompress(&bytes)?;
        self.checkpoints.insert(run_id.to_string(), bytes);
        log::debug!("loaded checkpoint for run '{}' from {:?}", run_id, path);
        Ok(Some(checkpoint))
    }

    /// Remove the checkpoint for `run_id`
    ///
    /// Returns whether a checkpoint existed.
    pub fn remove(&mut self, run_id: &str) -> Result<bool> {
        let mut existed = self.checkpoints.remove(run_id).is_some();

        if let Some(dir) = &self.persist_dir {
            let path = checkpoint_path(dir, run_id);
            if path.exists() {
                std::fs::remove_file(&path)?;
                existed = true;
            }
        }

        Ok(existed)
    }

    /// Run ids with a stored checkpoint, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.checkpoints.keys().cloned().collect();

        if let Some(dir) = &self.persist_dir {
            if dir.exists() {
                for entry in std::fs::read_dir(dir)? {
                    let path = entry?.path();
                    if path.extension().and_then(|e| e.to_str()) != Some(CHECKPOINT_EXTENSION) {
                        continue;
                    }
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        ids.push(stem.to_string());
                    }
                }
            }
        }

        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

impl Default for CheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

fn checkpoint_path(dir: &Path, run_id: &str) -> PathBuf {
    dir.join(format!("{}.{}", run_id, CHECKPOINT_EXTENSION))
}

fn compress(checkpoint: &Checkpoint) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(checkpoint)?;
    zstd::encode_all(&json[..], COMPRESSION_LEVEL).map_err(|e| EngineError::Compression(e.to_string()))
}

fn decompress(bytes: &[u8]) -> Result<Checkpoint> {
    let json = zstd::decode_all(bytes).map_err(|e| EngineError::Compression(e.to_string()))?;
    Ok(serde_json::from_slice(&json)?)
}
