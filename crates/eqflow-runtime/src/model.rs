//! The flattened execution runtime.
//!
//! A [`FlatModel`] owns one 3-axis tensor holding every simulation
//! variable, the index tables describing it, the global scalars and the
//! equation routine. [`FlatModel::compute`] drives the tensor to a fixed
//! point:
//!
//! 1. reduce sums, then snapshot the tensor;
//! 2. copy aliases, evaluate the equations, reduce sums again;
//! 3. stop once no entry moved by the tolerance or more since the
//!    snapshot, otherwise re-snapshot and repeat from 2.
//!
//! Iterations are strictly sequential. The only parallel step is the
//! refresh of the named path-variable snapshot, where every entry reads
//! one slot and writes its own value.

use indexmap::IndexMap;
use ndarray::{Array3, ArrayViewMut3, Zip};
use rayon::prelude::*;

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::summation::sum_mappings;
use crate::tables::{in_bounds, ModelTables, Triplet};

/// The equation routine a model evaluates each iteration.
pub trait ComputeEq {
    /// Evaluates every equation, reading and writing `vars` in place. The
    /// view fixes the tensor shape checked by [`check_bounds`](Self::check_bounds).
    fn compute_eq(&self, vars: ArrayViewMut3<'_, f64>, globals: &[f64]) -> Result<(), RuntimeError>;

    /// Checks that every slot the routine touches exists. Called once when
    /// the model is built.
    fn check_bounds(&self, _shape: Triplet, _globals: usize) -> Result<(), RuntimeError> {
        Ok(())
    }
}

impl<F> ComputeEq for F
where
    F: Fn(ArrayViewMut3<'_, f64>, &[f64]) -> Result<(), RuntimeError>,
{
    fn compute_eq(&self, vars: ArrayViewMut3<'_, f64>, globals: &[f64]) -> Result<(), RuntimeError> {
        self(vars, globals)
    }
}

/// A simulation model over a flattened variable tensor.
pub struct FlatModel<E> {
    vars: Array3<f64>,
    tables: ModelTables,
    globals: Vec<f64>,
    compute_eq: E,
    config: RuntimeConfig,
    path_index: IndexMap<String, usize>,
    path_values: Vec<f64>,
}

impl<E> std::fmt::Debug for FlatModel<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatModel")
            .field("shape", &shape_of(&self.vars))
            .field("states", &self.tables.states.len())
            .field("globals", &self.globals)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<E: ComputeEq> FlatModel<E> {
    /// Builds a model, checking every table against the tensor shape.
    ///
    /// `globals` must hold at least one entry: index 0 receives the
    /// simulation time in [`func`](Self::func).
    pub fn new(
        tables: ModelTables,
        vars: Array3<f64>,
        globals: Vec<f64>,
        compute_eq: E,
        config: RuntimeConfig,
    ) -> Result<Self, RuntimeError> {
        if globals.is_empty() {
            return Err(RuntimeError::EmptyGlobals);
        }
        let shape = shape_of(&vars);
        tables.validate(shape)?;
        compute_eq.check_bounds(shape, globals.len())?;

        let path_index: IndexMap<String, usize> = tables
            .path_names
            .iter()
            .enumerate()
            .map(|(k, name)| (name.clone(), k))
            .collect();
        let path_values = vec![0.0; tables.path_names.len()];

        tracing::debug!(
            shape = ?shape,
            states = tables.states.len(),
            aliases = tables.alias_to.len(),
            sums = tables.sums.destinations().len(),
            "built flat model"
        );
        Ok(FlatModel {
            vars,
            tables,
            globals,
            compute_eq,
            config,
            path_index,
            path_values,
        })
    }

    pub fn vars(&self) -> &Array3<f64> {
        &self.vars
    }

    /// Direct tensor access. Writes are visible to the next `compute`; the
    /// shape stays the one validated at construction.
    pub fn vars_mut(&mut self) -> ArrayViewMut3<'_, f64> {
        self.vars.view_mut()
    }

    pub fn globals(&self) -> &[f64] {
        &self.globals
    }

    pub fn globals_mut(&mut self) -> &mut [f64] {
        &mut self.globals
    }

    pub fn tables(&self) -> &ModelTables {
        &self.tables
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn number_of_states(&self) -> usize {
        self.tables.states.len()
    }

    // -----------------------------------------------------------------------
    // State I/O
    // -----------------------------------------------------------------------

    /// Writes a state vector, in state-table order, into the tensor.
    pub fn update_states(&mut self, values: &[f64]) -> Result<(), RuntimeError> {
        if values.len() != self.tables.states.len() {
            return Err(RuntimeError::StateLength {
                expected: self.tables.states.len(),
                got: values.len(),
            });
        }
        for (index, &value) in self.tables.states.iter().zip(values) {
            self.vars[index] = value;
        }
        Ok(())
    }

    /// Writes a single tensor slot.
    pub fn update_states_idx(&mut self, value: f64, index: Triplet) -> Result<(), RuntimeError> {
        let slot = self.slot_mut(index)?;
        *slot = value;
        Ok(())
    }

    /// State values in state-table order.
    pub fn get_states(&self) -> Vec<f64> {
        self.tables.states.iter().map(|i| self.vars[i]).collect()
    }

    /// Derivative values in derivative-table order.
    pub fn get_derivatives(&self) -> Vec<f64> {
        self.tables.derivatives.iter().map(|i| self.vars[i]).collect()
    }

    /// Reads a single tensor slot.
    pub fn get_derivatives_idx(&self, index: Triplet) -> Result<f64, RuntimeError> {
        if !in_bounds(index, shape_of(&self.vars)) {
            return Err(self.out_of_bounds(index));
        }
        Ok(self.vars[index])
    }

    fn slot_mut(&mut self, index: Triplet) -> Result<&mut f64, RuntimeError> {
        if !in_bounds(index, shape_of(&self.vars)) {
            return Err(self.out_of_bounds(index));
        }
        Ok(&mut self.vars[index])
    }

    fn out_of_bounds(&self, index: Triplet) -> RuntimeError {
        RuntimeError::IndexOutOfBounds {
            table: "direct access",
            position: 0,
            index,
            shape: shape_of(&self.vars),
        }
    }

    // -----------------------------------------------------------------------
    // Path variables
    // -----------------------------------------------------------------------

    /// Refreshes the named path-variable snapshot from the tensor.
    pub fn update_path_variables(&mut self) {
        let vars = &self.vars;
        let positions = &self.tables.variable_positions;
        self.path_values
            .par_iter_mut()
            .zip(self.tables.path_positions.par_iter())
            .for_each(|(value, &j)| *value = vars[positions.get(j)]);
    }

    /// Value of `name` as of the last [`update_path_variables`](Self::update_path_variables).
    pub fn path_variable(&self, name: &str) -> Option<f64> {
        self.path_index.get(name).map(|&k| self.path_values[k])
    }

    /// Every path variable with its snapshot value, in table order.
    pub fn path_variables(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.path_index
            .iter()
            .map(move |(name, &k)| (name.as_str(), self.path_values[k]))
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    /// Runs the alias / equation / summation loop to a fixed point and
    /// returns the number of iterations taken.
    ///
    /// With [`RuntimeConfig::max_iterations`] unset this does not return
    /// until the tensor settles.
    pub fn compute(&mut self) -> Result<usize, RuntimeError> {
        let has_sums = !self.tables.sums.is_empty();
        if has_sums {
            sum_mappings(&self.tables.sums, &mut self.vars);
        }

        let mut previous = self.vars.clone();
        let mut iterations = 0;
        loop {
            iterations += 1;
            for (to, from) in self.tables.alias_to.iter().zip(self.tables.alias_from.iter()) {
                self.vars[to] = self.vars[from];
            }
            self.compute_eq.compute_eq(self.vars.view_mut(), &self.globals)?;
            if has_sums {
                sum_mappings(&self.tables.sums, &mut self.vars);
            }

            let residual = max_abs_diff(&previous, &self.vars);
            tracing::trace!(iterations, residual, "fixed-point iteration");
            if residual < self.config.tolerance {
                return Ok(iterations);
            }
            if let Some(max) = self.config.max_iterations {
                if iterations >= max {
                    tracing::warn!(iterations, residual, "fixed-point iteration did not converge");
                    return Err(RuntimeError::ConvergenceFailure {
                        iterations,
                        residual,
                    });
                }
            }
            previous.assign(&self.vars);
        }
    }

    /// Right-hand side for an ODE integrator: writes `y` and `t`, computes
    /// the fixed point and returns the derivatives.
    pub fn func(&mut self, t: f64, y: &[f64]) -> Result<Vec<f64>, RuntimeError> {
        self.update_states(y)?;
        self.globals[0] = t;
        self.compute()?;
        Ok(self.get_derivatives())
    }
}

fn shape_of(vars: &Array3<f64>) -> Triplet {
    let (g, i, s) = vars.dim();
    [g, i, s]
}

/// Largest element-wise absolute difference. NaN anywhere yields NaN so a
/// NaN tensor never counts as converged.
fn max_abs_diff(a: &Array3<f64>, b: &Array3<f64>) -> f64 {
    Zip::from(a).and(b).fold(0.0, |acc: f64, &x, &y| {
        let d = (x - y).abs();
        if d.is_nan() || d > acc {
            d
        } else {
            acc
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::{IndexTable, SummationTable};

    fn single_state_tables() -> ModelTables {
        ModelTables {
            states: IndexTable::from_triplets(&[[0, 0, 0]]),
            derivatives: IndexTable::from_triplets(&[[0, 0, 1]]),
            ..ModelTables::default()
        }
    }

    fn noop(_: ArrayViewMut3<'_, f64>, _: &[f64]) -> Result<(), RuntimeError> {
        Ok(())
    }

    #[test]
    fn construction_requires_globals() {
        let err = FlatModel::new(
            single_state_tables(),
            Array3::zeros((1, 1, 2)),
            vec![],
            noop,
            RuntimeConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::EmptyGlobals));
    }

    #[test]
    fn construction_checks_bounds() {
        let err = FlatModel::new(
            single_state_tables(),
            Array3::zeros((1, 1, 1)),
            vec![0.0],
            noop,
            RuntimeConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::IndexOutOfBounds { table: "derivatives", .. }
        ));
    }

    #[test]
    fn state_round_trip_and_length_check() {
        let mut model = FlatModel::new(
            single_state_tables(),
            Array3::zeros((1, 1, 2)),
            vec![0.0],
            noop,
            RuntimeConfig::default(),
        )
        .unwrap();
        model.update_states(&[4.5]).unwrap();
        assert_eq!(model.get_states(), vec![4.5]);
        assert!(matches!(
            model.update_states(&[1.0, 2.0]),
            Err(RuntimeError::StateLength { expected: 1, got: 2 })
        ));

        model.update_states_idx(7.0, [0, 0, 1]).unwrap();
        assert_eq!(model.get_derivatives(), vec![7.0]);
        assert_eq!(model.get_derivatives_idx([0, 0, 1]).unwrap(), 7.0);
        assert!(model.update_states_idx(1.0, [0, 1, 0]).is_err());
        assert!(model.get_derivatives_idx([1, 0, 0]).is_err());
    }

    #[test]
    fn alias_feedback_converges_to_two() {
        // A at slot 0, B at slot 1; B <- A, A = 0.5 * B + 1.
        let tables = ModelTables {
            alias_to: IndexTable::from_triplets(&[[0, 0, 1]]),
            alias_from: IndexTable::from_triplets(&[[0, 0, 0]]),
            ..ModelTables::default()
        };
        let eq = |mut vars: ArrayViewMut3<'_, f64>, _: &[f64]| -> Result<(), RuntimeError> {
            vars[[0, 0, 0]] = 0.5 * vars[[0, 0, 1]] + 1.0;
            Ok(())
        };
        let mut model = FlatModel::new(
            tables,
            Array3::zeros((1, 1, 2)),
            vec![0.0],
            eq,
            RuntimeConfig::default(),
        )
        .unwrap();

        let iterations = model.compute().unwrap();
        assert!(iterations < 100, "took {} iterations", iterations);
        assert!((model.vars()[[0, 0, 0]] - 2.0).abs() < 1e-5);
        assert!((model.vars()[[0, 0, 1]] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn iteration_cap_reports_convergence_failure() {
        let grow = |mut vars: ArrayViewMut3<'_, f64>, _: &[f64]| -> Result<(), RuntimeError> {
            vars[[0, 0, 0]] += 1.0;
            Ok(())
        };
        let config = RuntimeConfig {
            max_iterations: Some(10),
            ..RuntimeConfig::default()
        };
        let mut model = FlatModel::new(
            ModelTables::default(),
            Array3::zeros((1, 1, 1)),
            vec![0.0],
            grow,
            config,
        )
        .unwrap();

        match model.compute() {
            Err(RuntimeError::ConvergenceFailure {
                iterations,
                residual,
            }) => {
                assert_eq!(iterations, 10);
                assert_eq!(residual, 1.0);
            }
            other => panic!("expected convergence failure, got {:?}", other),
        }
    }

    #[test]
    fn sums_are_reduced_before_and_after_equations() {
        // slot 2 = slot 0 + slot 1; the equation doubles slot 2 into slot 3.
        let tables = ModelTables {
            sums: SummationTable::new(
                IndexTable::from_triplets(&[[0, 0, 2]]),
                IndexTable::from_triplets(&[[0, 0, 0], [0, 0, 1]]),
                vec![0, 1],
                vec![2],
            )
            .unwrap(),
            ..ModelTables::default()
        };
        let double = |mut vars: ArrayViewMut3<'_, f64>, _: &[f64]| -> Result<(), RuntimeError> {
            vars[[0, 0, 3]] = 2.0 * vars[[0, 0, 2]];
            Ok(())
        };
        let mut vars = Array3::zeros((1, 1, 4));
        vars[[0, 0, 0]] = 1.5;
        vars[[0, 0, 1]] = 2.5;
        let mut model =
            FlatModel::new(tables, vars, vec![0.0], double, RuntimeConfig::default()).unwrap();

        model.compute().unwrap();
        assert_eq!(model.vars()[[0, 0, 2]], 4.0);
        assert_eq!(model.vars()[[0, 0, 3]], 8.0);
    }

    #[test]
    fn path_variables_snapshot_named_slots() {
        let tables = ModelTables {
            variable_positions: IndexTable::from_triplets(&[[0, 0, 0], [0, 0, 1], [0, 0, 2]]),
            path_names: vec!["tank.h".into(), "pipe.q".into()],
            path_positions: vec![2, 0],
            ..ModelTables::default()
        };
        let mut vars = Array3::zeros((1, 1, 3));
        vars[[0, 0, 0]] = 10.0;
        vars[[0, 0, 2]] = 30.0;
        let mut model =
            FlatModel::new(tables, vars, vec![0.0], noop, RuntimeConfig::default()).unwrap();

        assert_eq!(model.path_variable("tank.h"), Some(0.0));
        model.update_path_variables();
        assert_eq!(model.path_variable("tank.h"), Some(30.0));
        assert_eq!(model.path_variable("pipe.q"), Some(10.0));
        assert_eq!(model.path_variable("missing"), None);

        let all: Vec<(&str, f64)> = model.path_variables().collect();
        assert_eq!(all, vec![("tank.h", 30.0), ("pipe.q", 10.0)]);

        // The snapshot is a copy; later tensor writes need another refresh.
        model.vars_mut()[[0, 0, 2]] = 31.0;
        assert_eq!(model.path_variable("tank.h"), Some(30.0));
    }

    #[test]
    fn direct_writes_feed_the_next_evaluation() {
        // slot 1 = 3 * slot 0, seeded through the mutable view.
        let triple = |mut vars: ArrayViewMut3<'_, f64>, _: &[f64]| -> Result<(), RuntimeError> {
            vars[[0, 0, 1]] = 3.0 * vars[[0, 0, 0]];
            Ok(())
        };
        let tables = ModelTables {
            states: IndexTable::from_triplets(&[[0, 0, 2]]),
            derivatives: IndexTable::from_triplets(&[[0, 0, 1]]),
            ..ModelTables::default()
        };
        let mut model = FlatModel::new(
            tables,
            Array3::zeros((1, 1, 3)),
            vec![0.0],
            triple,
            RuntimeConfig::default(),
        )
        .unwrap();

        model.vars_mut()[[0, 0, 0]] = 4.0;
        assert_eq!(model.vars().dim(), (1, 1, 3));
        assert_eq!(model.func(0.5, &[1.0]).unwrap(), vec![12.0]);
        assert_eq!(model.globals(), &[0.5]);
    }

    #[test]
    fn nan_never_counts_as_converged() {
        let a = Array3::from_elem((1, 1, 2), 1.0);
        let mut b = a.clone();
        b[[0, 0, 0]] = f64::NAN;
        assert!(max_abs_diff(&a, &b).is_nan());
        assert_eq!(max_abs_diff(&a, &a), 0.0);
    }
}
