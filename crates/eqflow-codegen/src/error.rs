//! Codegen error types covering all compilation failure modes.
//!
//! None of these are recoverable inside the compiler: every variant aborts
//! the compile and propagates to the caller of the entry point.

use eqflow_core::{CoreError, NodeId, VarKey};

/// Errors that can occur while binding, lowering or materializing a graph.
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    /// A node kind has no translation rule in the position it was found.
    #[error("unsupported node {node} ({kind}) in {position} position")]
    UnsupportedNode {
        node: NodeId,
        kind: &'static str,
        position: &'static str,
    },

    /// The compiled function would have no outputs.
    #[error("function '{function}' has no outputs to return")]
    MissingReturn { function: String },

    /// The ordering hint names a key the graph never references.
    #[error("ordering hint references unknown variable '{key}'")]
    OrderingMismatch { key: VarKey },

    /// The ordering hint declares an output that no statement writes.
    #[error("declared output '{key}' never receives a write")]
    UnwrittenTarget { key: VarKey },

    /// A call node names an external function absent from the import list.
    #[error("unknown callee '{name}' at node {node}")]
    UnknownCallee { node: NodeId, name: String },

    /// A reference was requested for a key the binder never collected.
    #[error("variable '{key}' is not bound")]
    UnboundVariable { key: VarKey },

    /// Graph structure issue preventing lowering (arity, tuple shape, ...).
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// A callable was invoked with the wrong number of arguments.
    #[error("expected {expected} argument(s), got {got}")]
    ArgumentCount { expected: usize, got: usize },

    /// An output buffer does not match the callable's declared result count.
    #[error("expected {expected} output slot(s), got {got}")]
    OutputCount { expected: usize, got: usize },

    /// The synthesized native source failed to build. `generated` holds the
    /// source that was being compiled.
    #[error("failed to compile '{function}': {message}")]
    CompileFailure {
        function: String,
        message: String,
        generated: String,
    },

    /// LLVM API failure outside of module compilation.
    #[error("LLVM error: {0}")]
    LlvmError(String),

    /// Canonical serialization of a graph failed while hashing it.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}
