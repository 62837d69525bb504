//! Callables produced by the compiler.
//!
//! [`CompiledEquation`] is the backend-agnostic face the runtime sees: an
//! argument buffer in binder order, evaluated in place. [`EquationFunction`]
//! is the generic backend, a tree-walking evaluator over the lowered
//! [`FunctionDef`].

use smallvec::SmallVec;

use eqflow_core::ops::truth;
use eqflow_core::VarKey;

use crate::ast::{CallTarget, Expr, FunctionDef, Return, Stmt};
use crate::error::CodegenError;
use crate::signature::signature;

/// A compiled equation routine.
///
/// `evaluate` takes every argument in binder order and overwrites the
/// output positions in place. Implementations are immutable once built and
/// may be shared across any number of runtime instances.
pub trait CompiledEquation: Send + Sync {
    fn name(&self) -> &str;

    /// Argument keys in calling-convention order.
    fn arg_keys(&self) -> &[VarKey];

    /// Positions within [`arg_keys`](Self::arg_keys) that are outputs.
    fn target_positions(&self) -> &[usize];

    fn evaluate(&self, args: &mut [f64]) -> Result<(), CodegenError>;
}

/// Values returned from [`EquationFunction::call`].
#[derive(Debug, Clone, PartialEq)]
pub enum Returned {
    Single(f64),
    Tuple(Vec<f64>),
}

/// Generic-form compiled function.
#[derive(Debug, Clone)]
pub struct EquationFunction {
    def: FunctionDef,
    returns: Return,
    arg_keys: Vec<VarKey>,
    target_positions: Vec<usize>,
    signature: String,
}

impl EquationFunction {
    pub(crate) fn new(def: FunctionDef) -> Result<Self, CodegenError> {
        let returns = match def.body.last() {
            Some(Stmt::Return(r)) => r.clone(),
            _ => {
                return Err(CodegenError::MissingReturn {
                    function: def.name.clone(),
                })
            }
        };
        Ok(EquationFunction {
            arg_keys: def.arg_keys(),
            target_positions: def.target_positions(),
            signature: signature(&def.params),
            returns,
            def,
        })
    }

    /// The lowered definition this function evaluates.
    pub fn def(&self) -> &FunctionDef {
        &self.def
    }

    /// Typed signature string, e.g. `void(double, double*)`.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Calls the function positionally and returns its outputs: a single
    /// value when there is one output, a tuple otherwise.
    ///
    /// Outputs start from the values passed for them, so an accumulating
    /// write adds to the caller's prior value.
    pub fn call(&self, args: &[f64]) -> Result<Returned, CodegenError> {
        let mut frame: SmallVec<[f64; 16]> = SmallVec::from_slice(args);
        self.evaluate(&mut frame)?;
        Ok(match &self.returns {
            Return::Single(r) => Returned::Single(frame[r.slot]),
            Return::Tuple(refs) => Returned::Tuple(refs.iter().map(|r| frame[r.slot]).collect()),
        })
    }
}

impl CompiledEquation for EquationFunction {
    fn name(&self) -> &str {
        &self.def.name
    }

    fn arg_keys(&self) -> &[VarKey] {
        &self.arg_keys
    }

    fn target_positions(&self) -> &[usize] {
        &self.target_positions
    }

    fn evaluate(&self, args: &mut [f64]) -> Result<(), CodegenError> {
        if args.len() != self.arg_keys.len() {
            return Err(CodegenError::ArgumentCount {
                expected: self.arg_keys.len(),
                got: args.len(),
            });
        }
        exec_body(&self.def.body, args)
    }
}

// ---------------------------------------------------------------------------
// Tree-walking evaluation
// ---------------------------------------------------------------------------

type Values = SmallVec<[f64; 4]>;

fn exec_body(body: &[Stmt], frame: &mut [f64]) -> Result<(), CodegenError> {
    for stmt in body {
        match stmt {
            Stmt::Assign { target, value } => frame[target.slot] = eval_scalar(value, frame)?,
            Stmt::AugAssign { target, value } => frame[target.slot] += eval_scalar(value, frame)?,
            Stmt::AssignTuple { targets, value } => {
                let values = eval_values(value, frame)?;
                for (t, v) in targets.iter().zip(values) {
                    frame[t.slot] = v;
                }
            }
            Stmt::If { test, body } => {
                let mut taken = true;
                for t in test {
                    if eval_scalar(t, frame)? == 0.0 {
                        taken = false;
                        break;
                    }
                }
                if taken {
                    exec_body(body, frame)?;
                }
            }
            // Outputs already live in the frame.
            Stmt::Return(_) => {}
        }
    }
    Ok(())
}

fn eval_values(expr: &Expr, frame: &[f64]) -> Result<Values, CodegenError> {
    match expr {
        Expr::Call { callee, args } => call(callee, args, frame),
        other => Ok(SmallVec::from_elem(eval_scalar(other, frame)?, 1)),
    }
}

fn eval_scalar(expr: &Expr, frame: &[f64]) -> Result<f64, CodegenError> {
    Ok(match expr {
        Expr::Const(v) => *v,
        Expr::Var(r) => frame[r.slot],
        Expr::Binary { op, lhs, rhs } => op.eval(eval_scalar(lhs, frame)?, eval_scalar(rhs, frame)?),
        Expr::Unary { op, operand } => op.eval(eval_scalar(operand, frame)?),
        Expr::Call { callee, args } => call(callee, args, frame)?[0],
        Expr::Select {
            condition,
            then,
            otherwise,
        } => {
            if eval_scalar(condition, frame)? != 0.0 {
                eval_scalar(then, frame)?
            } else {
                eval_scalar(otherwise, frame)?
            }
        }
        Expr::Compare {
            left,
            ops,
            comparators,
        } => {
            let mut lhs = eval_scalar(left, frame)?;
            for (op, c) in ops.iter().zip(comparators) {
                let rhs = eval_scalar(c, frame)?;
                if !op.eval(lhs, rhs) {
                    return Ok(truth(false));
                }
                lhs = rhs;
            }
            truth(true)
        }
    })
}

fn call(callee: &CallTarget, args: &[Expr], frame: &[f64]) -> Result<Values, CodegenError> {
    let args = args
        .iter()
        .map(|a| eval_scalar(a, frame))
        .collect::<Result<Values, _>>()?;
    match callee {
        CallTarget::Math(m) => Ok(SmallVec::from_elem(m.apply(&args), 1)),
        CallTarget::External(f) => {
            let mut out: Values = SmallVec::from_elem(0.0, f.outputs);
            f.call(&args, &mut out)?;
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use eqflow_core::{BinOp, CmpOp, EquationGraph};

    #[test]
    fn single_output_returns_a_value() {
        let mut g = EquationGraph::new("eq");
        let a = g.add_var("a");
        let b = g.add_var("b");
        let mul = g.add_binop(BinOp::Mul, a, b).unwrap();
        let x = g.add_var("x");
        g.add_assign(&[x], mul).unwrap();

        let f = compile(&g, &[]).unwrap();
        assert_eq!(f.call(&[3.0, 4.0, 0.0]).unwrap(), Returned::Single(12.0));
        assert_eq!(f.signature(), "void(double, double, double*)");
    }

    #[test]
    fn wrong_argument_count_is_rejected() {
        let mut g = EquationGraph::new("eq");
        let a = g.add_var("a");
        let x = g.add_var("x");
        g.add_assign(&[x], a).unwrap();

        let f = compile(&g, &[]).unwrap();
        assert!(matches!(
            f.call(&[1.0]),
            Err(CodegenError::ArgumentCount { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn evaluate_writes_outputs_in_place() {
        let mut g = EquationGraph::new("eq");
        let a = g.add_var("a");
        let one = g.add_num(1.0);
        let sum = g.add_binop(BinOp::Add, a, one).unwrap();
        let y = g.add_var("y");
        g.add_assign(&[y], sum).unwrap();

        let f = compile(&g, &[]).unwrap();
        let mut buf = [41.0, 0.0];
        f.evaluate(&mut buf).unwrap();
        assert_eq!(buf, [41.0, 42.0]);
        assert_eq!(f.target_positions(), &[1]);
    }

    #[test]
    fn chained_comparison_short_circuits_to_false() {
        let mut g = EquationGraph::new("range");
        let lo = g.add_num(0.0);
        let a = g.add_var("a");
        let hi = g.add_num(1.0);
        let cmp = g.add_compare(lo, &[(CmpOp::Lt, a), (CmpOp::Lt, hi)]).unwrap();
        let y = g.add_var("y");
        g.add_assign(&[y], cmp).unwrap();

        let f = compile(&g, &[]).unwrap();
        assert_eq!(f.call(&[0.5, 0.0]).unwrap(), Returned::Single(1.0));
        assert_eq!(f.call(&[1.5, 0.0]).unwrap(), Returned::Single(0.0));
    }
}
