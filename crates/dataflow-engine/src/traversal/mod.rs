//! Resumable graph traversal.
//!
//! The traversal walks a graph one node at a time. Every step yields a
//! [`TraversalResult`] holding the visited node, its computed inputs and the
//! full continuation: the remaining opportunities and the edge state. Feeding
//! a yielded result back into [`Traversal::resume`] continues the walk
//! exactly as if it had never stopped.
//!
//! # Skips
//!
//! A node with missing required inputs and at least one non-optional
//! incoming edge is yielded with `skip = true`. If the missing value can
//! never arrive (its sources were skipped or cannot fire again), the skip
//! propagates and the node's outgoing edges are visited so dependents can
//! skip in turn. A node whose non-optional edges all come from skipped
//! nodes is skipped as well, so skips also cross wildcard and control
//! edges. Entry nodes with missing inputs are not skipped; the caller
//! supplies their data.
//!
//! # Example
//!
//! ```ignore
//! use dataflow_engine::{NodeRegistry, Traversal};
//!
//! let registry = NodeRegistry::with_builtins();
//! let mut traversal = Traversal::new(&graph, &registry);
//! while let Some(result) = traversal.next_result()? {
//!     if !result.skip {
//!         result.outputs = Some(result.inputs.clone());
//!     }
//! }
//! ```

mod machine;
mod result;

pub use machine::Traversal;
pub use result::TraversalResult;
