//! Hierarchical view of a run
//!
//! The probe stream is flat. [`RunObserver`] files it into a
//! [`PathRegistry`] so each sub-graph run and each map branch can be read on
//! its own.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dataflow_engine::{GraphRunner, RunObserver};
//!
//! let observer = Arc::new(RunObserver::new());
//! let runner = GraphRunner::new(registry).with_probe(observer.clone());
//! runner.run(&graph, inputs).await?;
//!
//! let registry = observer.snapshot();
//! for run in registry.find(&[1]).map(|e| e.nested()).unwrap_or_default() {
//!     println!("{:?}: {} events", run.path(), run.events().len());
//! }
//! ```

mod observer;
mod path_registry;

pub use observer::RunObserver;
pub use path_registry::{PathRegistry, PathRegistryEntry, RunEdge, RunEvent};
