//! Installing compiled equation functions as a model's `compute_eq`.
//!
//! An [`EquationSet`] holds compiled functions together with where each of
//! their arguments lives. Evaluating it gathers every function's arguments
//! from the tensor and the global scalars, runs the function, and scatters
//! its outputs back into the tensor. The functions themselves are shared
//! through `Arc` and never mutated, so any number of models can install the
//! same compiled routine.

use std::sync::Arc;

use ndarray::ArrayViewMut3;
use smallvec::SmallVec;

use eqflow_codegen::function::CompiledEquation;
use eqflow_codegen::CodegenError;
use eqflow_core::VarKey;

use crate::error::RuntimeError;
use crate::model::ComputeEq;
use crate::tables::{in_bounds, Triplet};

/// Where a compiled-function argument is read from (and, for outputs,
/// written to).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSource {
    /// A tensor slot `(group, instance, slot)`.
    Tensor(usize, usize, usize),
    /// Entry of the global-scalar vector. Read-only.
    Global(usize),
}

struct BoundEquation {
    function: Arc<dyn CompiledEquation>,
    sources: Vec<ArgSource>,
}

impl std::fmt::Debug for BoundEquation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundEquation")
            .field("function", &self.function.name())
            .field("sources", &self.sources)
            .finish()
    }
}

/// Compiled functions evaluated in insertion order.
#[derive(Debug, Default)]
pub struct EquationSet {
    equations: Vec<BoundEquation>,
}

impl EquationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `function` with one source per argument, in binder order.
    ///
    /// Outputs must live in the tensor.
    pub fn bind(
        &mut self,
        function: Arc<dyn CompiledEquation>,
        sources: Vec<ArgSource>,
    ) -> Result<&mut Self, RuntimeError> {
        let keys = function.arg_keys();
        if sources.len() != keys.len() {
            return Err(RuntimeError::Equation(CodegenError::ArgumentCount {
                expected: keys.len(),
                got: sources.len(),
            }));
        }
        for &pos in function.target_positions() {
            if let ArgSource::Global(_) = sources[pos] {
                return Err(RuntimeError::ReadOnlyTarget {
                    equation: function.name().to_string(),
                    key: keys[pos].clone(),
                });
            }
        }
        tracing::debug!(equation = function.name(), args = keys.len(), "bound equation");
        self.equations.push(BoundEquation { function, sources });
        Ok(self)
    }

    /// Adds `function`, resolving each argument key with `resolve`.
    pub fn bind_with<R>(
        &mut self,
        function: Arc<dyn CompiledEquation>,
        resolve: R,
    ) -> Result<&mut Self, RuntimeError>
    where
        R: Fn(&VarKey) -> Option<ArgSource>,
    {
        let sources = function
            .arg_keys()
            .iter()
            .map(|key| {
                resolve(key).ok_or_else(|| RuntimeError::UnboundVariable {
                    equation: function.name().to_string(),
                    key: key.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.bind(function, sources)
    }

    pub fn len(&self) -> usize {
        self.equations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.equations.is_empty()
    }
}

impl ComputeEq for EquationSet {
    fn compute_eq(&self, mut vars: ArrayViewMut3<'_, f64>, globals: &[f64]) -> Result<(), RuntimeError> {
        for eq in &self.equations {
            let mut args: SmallVec<[f64; 16]> = eq
                .sources
                .iter()
                .map(|source| match *source {
                    ArgSource::Tensor(g, i, s) => vars[[g, i, s]],
                    ArgSource::Global(k) => globals[k],
                })
                .collect();
            eq.function.evaluate(&mut args)?;
            for &pos in eq.function.target_positions() {
                if let ArgSource::Tensor(g, i, s) = eq.sources[pos] {
                    vars[[g, i, s]] = args[pos];
                }
            }
        }
        Ok(())
    }

    fn check_bounds(&self, shape: Triplet, globals: usize) -> Result<(), RuntimeError> {
        for eq in &self.equations {
            for (position, source) in eq.sources.iter().enumerate() {
                let ok = match *source {
                    ArgSource::Tensor(g, i, s) => in_bounds([g, i, s], shape),
                    ArgSource::Global(k) => k < globals,
                };
                if !ok {
                    let index = match *source {
                        ArgSource::Tensor(g, i, s) => [g, i, s],
                        ArgSource::Global(k) => [k, 0, 0],
                    };
                    return Err(RuntimeError::IndexOutOfBounds {
                        table: "equation arguments",
                        position,
                        index,
                        shape,
                    });
                }
            }
        }
        Ok(())
    }
}
