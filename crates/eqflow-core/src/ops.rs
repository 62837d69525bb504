//! Operator and callee vocabulary carried as node attributes.
//!
//! All values are `f64`. Comparisons and logical results are encoded as
//! `1.0` (true) and `0.0` (false); any non-zero value counts as true.
//!
//! # LLVM Lowering
//!
//! Each operator documents the instruction or intrinsic the native backend
//! emits for it. The scalar `eval`/`apply` methods here are the reference
//! semantics both backends must agree with.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Binary arithmetic operators.
///
/// # LLVM Lowering
/// `fadd`, `fsub`, `fmul`, `fdiv`, `frem` plus a sign fixup, and `llvm.pow.f64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    /// Floored remainder: a non-zero result takes the sign of the divisor.
    Mod,
    Pow,
}

impl BinOp {
    pub fn eval(&self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinOp::Add => lhs + rhs,
            BinOp::Sub => lhs - rhs,
            BinOp::Mul => lhs * rhs,
            BinOp::Div => lhs / rhs,
            BinOp::Mod => {
                let r = lhs % rhs;
                if r != 0.0 && (r < 0.0) != (rhs < 0.0) {
                    r + rhs
                } else {
                    r
                }
            }
            BinOp::Pow => lhs.powf(rhs),
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
        }
    }
}

/// Unary operators.
///
/// # LLVM Lowering
/// - `Neg`: `fneg`
/// - `Pos`: no instruction
/// - `Not`: `fcmp oeq x, 0.0` widened back to `f64`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

impl UnaryOp {
    pub fn eval(&self, operand: f64) -> f64 {
        match self {
            UnaryOp::Neg => -operand,
            UnaryOp::Pos => operand,
            UnaryOp::Not => truth(operand == 0.0),
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
            UnaryOp::Not => "!",
        }
    }
}

/// Comparison operators.
///
/// # LLVM Lowering
/// Ordered float predicates: `oeq`, `une`, `olt`, `ole`, `ogt`, `oge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn eval(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// Built-in scalar math functions available to call nodes without an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MathFn {
    Sin,
    Cos,
    Tan,
    Atan,
    Tanh,
    Exp,
    Log,
    Sqrt,
    Abs,
    Floor,
    Ceil,
    Pow,
    Atan2,
    Min,
    Max,
}

impl MathFn {
    /// Number of arguments the function takes.
    pub fn arity(&self) -> usize {
        match self {
            MathFn::Pow | MathFn::Atan2 | MathFn::Min | MathFn::Max => 2,
            _ => 1,
        }
    }

    /// Applies the function. `args` must hold exactly [`arity`](Self::arity)
    /// values; arity is checked when the call is lowered.
    pub fn apply(&self, args: &[f64]) -> f64 {
        match self {
            MathFn::Sin => args[0].sin(),
            MathFn::Cos => args[0].cos(),
            MathFn::Tan => args[0].tan(),
            MathFn::Atan => args[0].atan(),
            MathFn::Tanh => args[0].tanh(),
            MathFn::Exp => args[0].exp(),
            MathFn::Log => args[0].ln(),
            MathFn::Sqrt => args[0].sqrt(),
            MathFn::Abs => args[0].abs(),
            MathFn::Floor => args[0].floor(),
            MathFn::Ceil => args[0].ceil(),
            MathFn::Pow => args[0].powf(args[1]),
            MathFn::Atan2 => args[0].atan2(args[1]),
            MathFn::Min => args[0].min(args[1]),
            MathFn::Max => args[0].max(args[1]),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MathFn::Sin => "sin",
            MathFn::Cos => "cos",
            MathFn::Tan => "tan",
            MathFn::Atan => "atan",
            MathFn::Tanh => "tanh",
            MathFn::Exp => "exp",
            MathFn::Log => "log",
            MathFn::Sqrt => "sqrt",
            MathFn::Abs => "abs",
            MathFn::Floor => "floor",
            MathFn::Ceil => "ceil",
            MathFn::Pow => "pow",
            MathFn::Atan2 => "atan2",
            MathFn::Min => "min",
            MathFn::Max => "max",
        }
    }
}

/// Callee reference recorded on a call node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Callee {
    /// A built-in scalar function.
    Math(MathFn),
    /// A function supplied through the import list at compile time.
    External { name: String },
}

impl Callee {
    pub fn external(name: impl Into<String>) -> Self {
        Callee::External { name: name.into() }
    }
}

impl fmt::Display for Callee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callee::Math(m) => f.write_str(m.name()),
            Callee::External { name } => f.write_str(name),
        }
    }
}

/// Encodes a boolean as `1.0` / `0.0`.
pub fn truth(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}
