//! Variable binder: stable calling-convention positions for graph variables.
//!
//! Binding is an explicit two-pass algorithm:
//!
//! 1. **Collect** walks the statements in the same order lowering will
//!    (assignment: value, then targets; conditional: test, then body),
//!    recording every variable key in first-seen order and marking the keys
//!    that receive a write as targets.
//! 2. **Order** places the keys named by the ordering hint first, in hint
//!    order, followed by the remaining keys in first-seen order.
//!
//! After [`VariableBinder::order`] returns, the binder is immutable and
//! [`VariableBinder::reference`] is a pure lookup, so every occurrence of a
//! key lowers to the same [`VarRef`].

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use eqflow_core::{EdgeRole, EquationGraph, NodeId, NodeKind, VarKey};

use crate::ast::{ArgRole, Param, VarRef};
use crate::error::CodegenError;
use crate::lower::condition_roots;

/// How a reference is used by the lowered code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// One entry of an externally supplied ordering hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgMetadata {
    pub key: VarKey,
    /// The caller expects this key to be an output.
    #[serde(default)]
    pub is_target: bool,
}

impl ArgMetadata {
    pub fn input(key: impl Into<VarKey>) -> Self {
        ArgMetadata {
            key: key.into(),
            is_target: false,
        }
    }

    pub fn target(key: impl Into<VarKey>) -> Self {
        ArgMetadata {
            key: key.into(),
            is_target: true,
        }
    }
}

/// Final key order and roles for one graph.
#[derive(Debug, Clone)]
pub struct VariableBinder {
    positions: IndexMap<VarKey, usize>,
    targets: IndexSet<VarKey>,
}

impl VariableBinder {
    /// Collects the keys referenced by `graph` and assigns their positions.
    ///
    /// # Errors
    ///
    /// - [`CodegenError::OrderingMismatch`] if `hint` names a key the
    ///   graph's statements never reference.
    /// - [`CodegenError::UnwrittenTarget`] if `hint` marks a key as output
    ///   but no statement writes it.
    pub fn order(graph: &EquationGraph, hint: &[ArgMetadata]) -> Result<Self, CodegenError> {
        let mut seen: IndexSet<VarKey> = IndexSet::new();
        let mut targets: IndexSet<VarKey> = IndexSet::new();
        collect_statements(graph, &mut seen, &mut targets)?;

        let mut ordered: IndexSet<VarKey> = IndexSet::with_capacity(seen.len());
        for meta in hint {
            if !seen.contains(&meta.key) {
                return Err(CodegenError::OrderingMismatch {
                    key: meta.key.clone(),
                });
            }
            if meta.is_target && !targets.contains(&meta.key) {
                return Err(CodegenError::UnwrittenTarget {
                    key: meta.key.clone(),
                });
            }
            ordered.insert(meta.key.clone());
        }
        ordered.extend(seen);

        let positions = ordered
            .into_iter()
            .enumerate()
            .map(|(slot, key)| (key, slot))
            .collect();
        Ok(VariableBinder { positions, targets })
    }

    /// Returns the reference for `key`. The same key always yields the same
    /// slot.
    pub fn reference(&self, key: &VarKey, access: Access) -> Result<VarRef, CodegenError> {
        let slot = *self
            .positions
            .get(key)
            .ok_or_else(|| CodegenError::UnboundVariable { key: key.clone() })?;
        if access == Access::Write && !self.targets.contains(key) {
            return Err(CodegenError::InvalidGraph(format!(
                "write to '{}' which was not collected as a target",
                key
            )));
        }
        Ok(VarRef {
            key: key.clone(),
            slot,
        })
    }

    /// Keys in calling-convention order.
    pub fn ordered_keys(&self) -> impl Iterator<Item = &VarKey> {
        self.positions.keys()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn role(&self, key: &VarKey) -> ArgRole {
        if self.targets.contains(key) {
            ArgRole::Target
        } else {
            ArgRole::Input
        }
    }

    pub fn params(&self) -> Vec<Param> {
        self.ordered_keys()
            .map(|key| Param {
                key: key.clone(),
                role: self.role(key),
            })
            .collect()
    }

    /// Positions within the ordered key list that are outputs.
    pub fn target_positions(&self) -> Vec<usize> {
        self.positions
            .iter()
            .filter(|(key, _)| self.targets.contains(*key))
            .map(|(_, &slot)| slot)
            .collect()
    }

    /// Output references in binder order.
    pub fn target_refs(&self) -> Vec<VarRef> {
        self.positions
            .iter()
            .filter(|(key, _)| self.targets.contains(*key))
            .map(|(key, &slot)| VarRef {
                key: key.clone(),
                slot,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Collection pass
// ---------------------------------------------------------------------------

fn collect_statements(
    graph: &EquationGraph,
    seen: &mut IndexSet<VarKey>,
    targets: &mut IndexSet<VarKey>,
) -> Result<(), CodegenError> {
    for node in graph.nodes() {
        match graph.kind(node)? {
            NodeKind::Assign | NodeKind::AugAssign => {
                let value = graph.operand(node, EdgeRole::Value)?;
                collect_expr(graph, value, seen)?;
                for target in graph.targets(node) {
                    if let NodeKind::Var { key } = graph.kind(target)? {
                        seen.insert(key.clone());
                        targets.insert(key.clone());
                    }
                }
            }
            NodeKind::If { test, body } => {
                for root in condition_roots(test)? {
                    collect_expr(test, root, seen)?;
                }
                collect_statements(body, seen, targets)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn collect_expr(
    graph: &EquationGraph,
    node: NodeId,
    seen: &mut IndexSet<VarKey>,
) -> Result<(), CodegenError> {
    match graph.kind(node)? {
        NodeKind::Var { key } => {
            seen.insert(key.clone());
        }
        NodeKind::Num { .. } => {}
        NodeKind::BinOp { .. } => {
            collect_expr(graph, graph.operand(node, EdgeRole::Left)?, seen)?;
            collect_expr(graph, graph.operand(node, EdgeRole::Right)?, seen)?;
        }
        NodeKind::UnaryOp { .. } => {
            collect_expr(graph, graph.operand(node, EdgeRole::Operand)?, seen)?;
        }
        NodeKind::Call { .. } => {
            for arg in graph.operands(node, EdgeRole::Argument) {
                collect_expr(graph, arg, seen)?;
            }
        }
        NodeKind::IfExp => {
            collect_expr(graph, graph.operand(node, EdgeRole::Condition)?, seen)?;
            collect_expr(graph, graph.operand(node, EdgeRole::Then)?, seen)?;
            collect_expr(graph, graph.operand(node, EdgeRole::Else)?, seen)?;
        }
        NodeKind::Compare { .. } => {
            collect_expr(graph, graph.operand(node, EdgeRole::Left)?, seen)?;
            for c in graph.operands(node, EdgeRole::Comparator) {
                collect_expr(graph, c, seen)?;
            }
        }
        // Statements in expression position are reported by lowering.
        NodeKind::Assign | NodeKind::AugAssign | NodeKind::If { .. } => {}
    }
    Ok(())
}
