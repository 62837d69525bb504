//! Core error types for eqflow-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! failure modes of building and querying an equation graph.

use crate::id::NodeId;
use thiserror::Error;

/// Core errors produced by the eqflow-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A node index was not found in the graph.
    #[error("node not found: NodeId({id})", id = id.0)]
    NodeNotFound { id: NodeId },

    /// An edge failed validation.
    #[error("invalid edge: {reason}")]
    InvalidEdge { reason: String },

    /// A node does not carry the structural edges its kind requires.
    #[error("node {node} ({kind}) expects {expected} {role} edge(s), found {found}")]
    ArityMismatch {
        node: NodeId,
        kind: &'static str,
        role: &'static str,
        expected: String,
        found: usize,
    },

    /// Topological ordering was requested strictly but the graph has a cycle.
    #[error("cycle detected in graph '{graph}' at node {node}")]
    Cycle { graph: String, node: NodeId },
}
