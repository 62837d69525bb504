//! Node kinds of the equation graph.
//!
//! [`NodeKind`] is a closed enum over the ten expression and statement kinds.
//! The kind alone fixes which structural edges a node must carry; see
//! [`NodeKind::edge_rules`] and [`EquationGraph::validate`](crate::graph::EquationGraph::validate).

use serde::{Deserialize, Serialize};

use crate::edge::EdgeRole;
use crate::graph::EquationGraph;
use crate::id::VarKey;
use crate::ops::{BinOp, Callee, CmpOp, UnaryOp};

/// How many edges of a role a node kind requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn admits(&self, count: usize) -> bool {
        match self {
            Arity::Exactly(n) => count == *n,
            Arity::AtLeast(n) => count >= *n,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Arity::Exactly(n) => format!("exactly {}", n),
            Arity::AtLeast(n) => format!("at least {}", n),
        }
    }
}

/// The kind of a graph node, with its kind-specific attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeKind {
    // -- Expressions --
    /// Reference to a named simulation variable.
    Var { key: VarKey },
    /// Numeric literal.
    Num { value: f64 },
    /// Binary operator over LEFT and RIGHT.
    BinOp { op: BinOp },
    /// Unary operator over OPERAND.
    UnaryOp { op: UnaryOp },
    /// Call of `callee` with ordered ARGUMENT edges.
    Call { callee: Callee },
    /// Ternary select: CONDITION ? THEN : ELSE.
    IfExp,
    /// Chained comparison `LEFT ops[0] COMPARATOR[0] ops[1] COMPARATOR[1] ...`.
    Compare { ops: Vec<CmpOp> },

    // -- Statements --
    /// Plain write of VALUE into every TARGET.
    Assign,
    /// Accumulating write of VALUE into TARGET.
    AugAssign,
    /// Conditional statement with independently compiled sub-graphs.
    /// There is no else branch; alternatives are separate top-level
    /// conditional statements.
    If {
        test: Box<EquationGraph>,
        body: Box<EquationGraph>,
    },
}

impl NodeKind {
    /// Short kind name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Var { .. } => "variable",
            NodeKind::Num { .. } => "literal",
            NodeKind::BinOp { .. } => "binary-op",
            NodeKind::UnaryOp { .. } => "unary-op",
            NodeKind::Call { .. } => "call",
            NodeKind::IfExp => "conditional-expression",
            NodeKind::Compare { .. } => "comparison",
            NodeKind::Assign => "assignment",
            NodeKind::AugAssign => "augmented-assignment",
            NodeKind::If { .. } => "conditional-statement",
        }
    }

    /// Required edge roles and their arity for this kind.
    ///
    /// Roles not listed must not appear on the node. Call arguments are
    /// unconstrained in count here; the callee's arity is checked when the
    /// call is lowered.
    pub fn edge_rules(&self) -> Vec<(EdgeRole, Arity)> {
        match self {
            NodeKind::Var { .. } | NodeKind::Num { .. } | NodeKind::If { .. } => vec![],
            NodeKind::BinOp { .. } => vec![
                (EdgeRole::Left, Arity::Exactly(1)),
                (EdgeRole::Right, Arity::Exactly(1)),
            ],
            NodeKind::UnaryOp { .. } => vec![(EdgeRole::Operand, Arity::Exactly(1))],
            NodeKind::Call { .. } => vec![(EdgeRole::Argument, Arity::AtLeast(0))],
            NodeKind::IfExp => vec![
                (EdgeRole::Condition, Arity::Exactly(1)),
                (EdgeRole::Then, Arity::Exactly(1)),
                (EdgeRole::Else, Arity::Exactly(1)),
            ],
            NodeKind::Compare { ops } => vec![
                (EdgeRole::Left, Arity::Exactly(1)),
                (EdgeRole::Comparator, Arity::Exactly(ops.len())),
            ],
            NodeKind::Assign | NodeKind::AugAssign => vec![
                (EdgeRole::Value, Arity::Exactly(1)),
                (EdgeRole::Target, Arity::AtLeast(1)),
            ],
        }
    }
}

/// A node in the equation graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EqNode {
    pub kind: NodeKind,
}

impl EqNode {
    pub fn new(kind: NodeKind) -> Self {
        EqNode { kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_rules_follow_operator_count() {
        let kind = NodeKind::Compare {
            ops: vec![CmpOp::Lt, CmpOp::Le],
        };
        let rules = kind.edge_rules();
        assert_eq!(rules[1], (EdgeRole::Comparator, Arity::Exactly(2)));
    }

    #[test]
    fn arity_admits() {
        assert!(Arity::Exactly(1).admits(1));
        assert!(!Arity::Exactly(1).admits(2));
        assert!(Arity::AtLeast(1).admits(3));
        assert!(!Arity::AtLeast(1).admits(0));
    }
}
