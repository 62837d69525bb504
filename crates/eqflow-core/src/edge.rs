//! Structural edges of the equation graph.
//!
//! Every edge is typed by the role its source plays for the node it connects
//! to. Operand-like roles (LEFT, RIGHT, OPERAND, ARGUMENT, CONDITION, THEN,
//! ELSE, COMPARATOR, VALUE) point from the operand to the consuming node.
//! TARGET edges point from an assignment to the variable node it writes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of structural roles an edge can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeRole {
    Left,
    Right,
    Operand,
    Argument,
    Condition,
    Then,
    Else,
    Comparator,
    Target,
    Value,
}

impl EdgeRole {
    /// Returns `true` if edges of this role point away from the node that
    /// owns them (assignment -> written variable).
    pub fn is_outgoing(&self) -> bool {
        matches!(self, EdgeRole::Target)
    }

    pub fn name(&self) -> &'static str {
        match self {
            EdgeRole::Left => "LEFT",
            EdgeRole::Right => "RIGHT",
            EdgeRole::Operand => "OPERAND",
            EdgeRole::Argument => "ARGUMENT",
            EdgeRole::Condition => "CONDITION",
            EdgeRole::Then => "THEN",
            EdgeRole::Else => "ELSE",
            EdgeRole::Comparator => "COMPARATOR",
            EdgeRole::Target => "TARGET",
            EdgeRole::Value => "VALUE",
        }
    }
}

impl fmt::Display for EdgeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Edge weight stored in the graph.
///
/// `index` orders edges of the same role on the same node: argument order
/// of a call, comparator order of a comparison, target order of a
/// multi-target assignment. Single-arity roles always use index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub role: EdgeRole,
    pub index: u16,
}

impl Edge {
    pub fn new(role: EdgeRole, index: u16) -> Self {
        Edge { role, index }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_target_is_outgoing() {
        assert!(EdgeRole::Target.is_outgoing());
        for role in [
            EdgeRole::Left,
            EdgeRole::Right,
            EdgeRole::Operand,
            EdgeRole::Argument,
            EdgeRole::Condition,
            EdgeRole::Then,
            EdgeRole::Else,
            EdgeRole::Comparator,
            EdgeRole::Value,
        ] {
            assert!(!role.is_outgoing(), "{role} should point into its consumer");
        }
    }

    #[test]
    fn serde_roundtrip_edge() {
        let edge = Edge::new(EdgeRole::Argument, 2);
        let json = serde_json::to_string(&edge).unwrap();
        let back: Edge = serde_json::from_str(&json).unwrap();
        assert_eq!(edge, back);
    }
}
