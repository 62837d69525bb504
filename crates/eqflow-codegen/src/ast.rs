//! Lowered function form shared by both backends.
//!
//! Lowering turns an [`EquationGraph`](eqflow_core::EquationGraph) into a
//! [`FunctionDef`]: positional parameters in binder order and a body of
//! [`Stmt`]s over [`Expr`]s. The generic backend evaluates this tree
//! directly; the native backend emits LLVM IR from it. `Display` renders
//! readable pseudo-source for diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};

use eqflow_core::{BinOp, CmpOp, MathFn, UnaryOp, VarKey};

use crate::imports::ExternalFunction;

/// Whether a parameter is read-only or written by the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgRole {
    Input,
    Target,
}

/// Resolved reference to a variable: its key and calling-convention slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VarRef {
    pub key: VarKey,
    pub slot: usize,
}

/// Callee after resolution against the built-ins and the import list.
#[derive(Debug, Clone)]
pub enum CallTarget {
    Math(MathFn),
    External(ExternalFunction),
}

impl CallTarget {
    pub fn arity(&self) -> usize {
        match self {
            CallTarget::Math(m) => m.arity(),
            CallTarget::External(f) => f.arity,
        }
    }

    pub fn outputs(&self) -> usize {
        match self {
            CallTarget::Math(_) => 1,
            CallTarget::External(f) => f.outputs,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CallTarget::Math(m) => m.name(),
            CallTarget::External(f) => &f.name,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Expr {
    Const(f64),
    Var(VarRef),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Call {
        callee: CallTarget,
        args: Vec<Expr>,
    },
    Select {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// Chained comparison; true when every adjacent pair satisfies its op.
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
}

impl Expr {
    /// Number of values the expression produces. Only external calls may
    /// produce more than one.
    pub fn outputs(&self) -> usize {
        match self {
            Expr::Call { callee, .. } => callee.outputs(),
            _ => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Stmt {
    /// Plain write.
    Assign { target: VarRef, value: Expr },
    /// Accumulating write (`target += value`).
    AugAssign { target: VarRef, value: Expr },
    /// Tuple destructuring of a multi-valued expression.
    AssignTuple { targets: Vec<VarRef>, value: Expr },
    /// Runs `body` when every test expression is true. No else branch.
    If { test: Vec<Expr>, body: Vec<Stmt> },
    Return(Return),
}

/// Synthesized return of the output variables in binder order.
#[derive(Debug, Clone)]
pub enum Return {
    Single(VarRef),
    Tuple(Vec<VarRef>),
}

impl Return {
    pub fn refs(&self) -> &[VarRef] {
        match self {
            Return::Single(r) => std::slice::from_ref(r),
            Return::Tuple(rs) => rs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub key: VarKey,
    pub role: ArgRole,
}

/// A lowered function definition.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

impl FunctionDef {
    pub fn arg_keys(&self) -> Vec<VarKey> {
        self.params.iter().map(|p| p.key.clone()).collect()
    }

    /// Positions of the output parameters within [`params`](Self::params).
    pub fn target_positions(&self) -> Vec<usize> {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.role == ArgRole::Target)
            .map(|(i, _)| i)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Pseudo-source rendering
// ---------------------------------------------------------------------------

impl fmt::Display for VarRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(v) => write!(f, "{:?}", v),
            Expr::Var(r) => write!(f, "{}", r),
            Expr::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
            Expr::Unary { op, operand } => write!(f, "{}{}", op.symbol(), operand),
            Expr::Call { callee, args } => {
                write!(f, "{}(", callee.name())?;
                write_joined(f, args)?;
                write!(f, ")")
            }
            Expr::Select {
                condition,
                then,
                otherwise,
            } => write!(f, "({} ? {} : {})", condition, then, otherwise),
            Expr::Compare {
                left,
                ops,
                comparators,
            } => {
                write!(f, "({}", left)?;
                for (op, c) in ops.iter().zip(comparators) {
                    write!(f, " {} {}", op.symbol(), c)?;
                }
                write!(f, ")")
            }
        }
    }
}

fn write_joined<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn write_block(f: &mut fmt::Formatter<'_>, body: &[Stmt], depth: usize) -> fmt::Result {
    let pad = "    ".repeat(depth);
    for stmt in body {
        match stmt {
            Stmt::Assign { target, value } => writeln!(f, "{}{} = {};", pad, target, value)?,
            Stmt::AugAssign { target, value } => writeln!(f, "{}{} += {};", pad, target, value)?,
            Stmt::AssignTuple { targets, value } => {
                write!(f, "{}(", pad)?;
                write_joined(f, targets)?;
                writeln!(f, ") = {};", value)?;
            }
            Stmt::If { test, body } => {
                write!(f, "{}if ", pad)?;
                for (i, t) in test.iter().enumerate() {
                    if i > 0 {
                        write!(f, " && ")?;
                    }
                    write!(f, "{}", t)?;
                }
                writeln!(f, " {{")?;
                write_block(f, body, depth + 1)?;
                writeln!(f, "{}}}", pad)?;
            }
            Stmt::Return(Return::Single(r)) => writeln!(f, "{}return {};", pad, r)?,
            Stmt::Return(Return::Tuple(rs)) => {
                write!(f, "{}return (", pad)?;
                write_joined(f, rs)?;
                writeln!(f, ");")?;
            }
        }
    }
    Ok(())
}

impl fmt::Display for FunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn {}(", self.name)?;
        let keys: Vec<&VarKey> = self.params.iter().map(|p| &p.key).collect();
        write_joined(f, &keys)?;
        writeln!(f, ") {{")?;
        write_block(f, &self.body, 1)?;
        write!(f, "}}")
    }
}
