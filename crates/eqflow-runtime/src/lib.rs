//! Flattened execution runtime for compiled equation systems.
//!
//! Every simulation variable lives in one `ndarray::Array3<f64>` addressed
//! by `(group, instance, slot)`. A [`FlatModel`] repeatedly applies alias
//! copies, the compiled equations and summation reductions to that tensor
//! until it stops changing, and exposes the state and derivative vectors an
//! ODE integrator needs through [`FlatModel::func`].
//!
//! Compiled functions from `eqflow-codegen` are installed with an
//! [`EquationSet`]; any closure over the tensor works as well.

pub mod config;
pub mod equations;
pub mod error;
pub mod model;
pub mod summation;
pub mod tables;

pub use config::RuntimeConfig;
pub use equations::{ArgSource, EquationSet};
pub use error::RuntimeError;
pub use model::{ComputeEq, FlatModel};
pub use summation::sum_mappings;
pub use tables::{IndexTable, ModelTables, SummationTable, Triplet};
