//! Graph IR for equation systems.
//!
//! An [`EquationGraph`] describes one scalar equation system as typed nodes
//! (expressions and statements) connected by role-typed edges. The code
//! generator in `eqflow-codegen` consumes it; this crate only builds,
//! validates and queries it.

pub mod edge;
pub mod error;
pub mod graph;
pub mod id;
pub mod node;
pub mod ops;

// Re-export commonly used types
pub use edge::{Edge, EdgeRole};
pub use error::CoreError;
pub use graph::EquationGraph;
pub use id::{NodeId, VarKey};
pub use node::{Arity, EqNode, NodeKind};
pub use ops::{BinOp, Callee, CmpOp, MathFn, UnaryOp};
