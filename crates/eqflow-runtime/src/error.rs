//! Runtime error types.

use eqflow_codegen::CodegenError;
use eqflow_core::VarKey;
use thiserror::Error;

/// Errors produced while assembling or driving a [`FlatModel`](crate::FlatModel).
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The three arrays of an index table differ in length.
    #[error("index table '{table}' has arrays of unequal length ({groups}, {instances}, {slots})")]
    TableLength {
        table: &'static str,
        groups: usize,
        instances: usize,
        slots: usize,
    },

    /// A triplet points outside the tensor.
    #[error("index table '{table}' entry {position} is {index:?}, outside tensor shape {shape:?}")]
    IndexOutOfBounds {
        table: &'static str,
        position: usize,
        index: [usize; 3],
        shape: [usize; 3],
    },

    /// Two tables that must align entry by entry do not.
    #[error("table layout: {reason}")]
    Layout { reason: String },

    /// A state vector of the wrong length was supplied.
    #[error("expected {expected} state value(s), got {got}")]
    StateLength { expected: usize, got: usize },

    /// The model was built without any global scalar.
    #[error("at least one global scalar (simulation time) is required")]
    EmptyGlobals,

    /// A compiled equation argument could not be bound to a tensor slot or
    /// global.
    #[error("equation '{equation}' references unbound variable '{key}'")]
    UnboundVariable { equation: String, key: VarKey },

    /// A compiled equation writes a variable bound to a global scalar.
    #[error("equation '{equation}' writes read-only global '{key}'")]
    ReadOnlyTarget { equation: String, key: VarKey },

    /// The fixed-point iteration hit its configured cap.
    #[error("no fixed point after {iterations} iteration(s), residual {residual:e}")]
    ConvergenceFailure { iterations: usize, residual: f64 },

    #[error(transparent)]
    Equation(#[from] CodegenError),
}
