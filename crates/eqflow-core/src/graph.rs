//! EquationGraph: the typed node/edge structure of one equation system.
//!
//! [`EquationGraph`] wraps a petgraph `StableGraph<EqNode, Edge>` and is the
//! single entry point for building and querying the graph the compiler
//! consumes. Node ids are handed out in insertion order and never reused,
//! so [`EquationGraph::nodes`] doubles as positional statement order.
//!
//! Conditional-statement nodes own their `test` and `body` sub-graphs; those
//! are complete `EquationGraph`s of their own and are validated and lowered
//! independently.

use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use serde::{Deserialize, Serialize};

use crate::edge::{Edge, EdgeRole};
use crate::error::CoreError;
use crate::id::{NodeId, VarKey};
use crate::node::{EqNode, NodeKind};
use crate::ops::{BinOp, Callee, CmpOp, UnaryOp};

const ALL_ROLES: [EdgeRole; 10] = [
    EdgeRole::Left,
    EdgeRole::Right,
    EdgeRole::Operand,
    EdgeRole::Argument,
    EdgeRole::Condition,
    EdgeRole::Then,
    EdgeRole::Else,
    EdgeRole::Comparator,
    EdgeRole::Target,
    EdgeRole::Value,
];

/// The equation graph container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquationGraph {
    label: String,
    graph: StableGraph<EqNode, Edge, Directed, u32>,
}

impl EquationGraph {
    /// Creates an empty graph. `label` names the compiled function.
    pub fn new(label: impl Into<String>) -> Self {
        EquationGraph {
            label: label.into(),
            graph: StableGraph::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns a read-only reference to the underlying petgraph graph.
    pub fn inner(&self) -> &StableGraph<EqNode, Edge, Directed, u32> {
        &self.graph
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// All node ids in insertion order.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.graph.node_indices().map(NodeId::from).collect()
    }

    pub fn node(&self, id: NodeId) -> Option<&EqNode> {
        self.graph.node_weight(NodeIndex::from(id))
    }

    /// Looks up the kind of a node.
    pub fn kind(&self, id: NodeId) -> Result<&NodeKind, CoreError> {
        self.node(id)
            .map(|n| &n.kind)
            .ok_or(CoreError::NodeNotFound { id })
    }

    /// Nodes connected to `node` through edges of `role`, ordered by edge
    /// index.
    ///
    /// For operand-like roles these are the sources of incoming edges; for
    /// [`EdgeRole::Target`] they are the variable nodes the assignment writes.
    pub fn operands(&self, node: NodeId, role: EdgeRole) -> Vec<NodeId> {
        let idx = NodeIndex::from(node);
        let direction = if role.is_outgoing() {
            Direction::Outgoing
        } else {
            Direction::Incoming
        };

        let mut found: Vec<(u16, NodeId)> = self
            .graph
            .edges_directed(idx, direction)
            .filter(|e| e.weight().role == role)
            .map(|e| {
                let other = if role.is_outgoing() {
                    e.target()
                } else {
                    e.source()
                };
                (e.weight().index, NodeId::from(other))
            })
            .collect();
        found.sort_by_key(|(index, _)| *index);
        found.into_iter().map(|(_, id)| id).collect()
    }

    /// The single node connected to `node` through `role`.
    pub fn operand(&self, node: NodeId, role: EdgeRole) -> Result<NodeId, CoreError> {
        let found = self.operands(node, role);
        if found.len() == 1 {
            Ok(found[0])
        } else {
            Err(CoreError::ArityMismatch {
                node,
                kind: self.kind(node)?.name(),
                role: role.name(),
                expected: "exactly 1".to_string(),
                found: found.len(),
            })
        }
    }

    /// Variable nodes written by an assignment, in edge order.
    pub fn targets(&self, node: NodeId) -> Vec<NodeId> {
        self.operands(node, EdgeRole::Target)
    }

    /// Every variable key referenced anywhere in the graph, sub-graphs
    /// included, deduplicated in first-seen node order.
    pub fn variable_keys(&self) -> Vec<VarKey> {
        let mut keys: Vec<VarKey> = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys(&self, keys: &mut Vec<VarKey>) {
        for idx in self.graph.node_indices() {
            match &self.graph[idx].kind {
                NodeKind::Var { key } => {
                    if !keys.contains(key) {
                        keys.push(key.clone());
                    }
                }
                NodeKind::If { test, body } => {
                    test.collect_keys(keys);
                    body.collect_keys(keys);
                }
                _ => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Raw mutation
    // -----------------------------------------------------------------------

    /// Adds a node of any kind without edges.
    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        NodeId::from(self.graph.add_node(EqNode::new(kind)))
    }

    /// Adds a typed edge. For [`EdgeRole::Target`] `from` is the assignment
    /// and `to` the variable; for every other role `from` is the operand and
    /// `to` the consuming node.
    pub fn add_edge(
        &mut self,
        from: NodeId,
        to: NodeId,
        role: EdgeRole,
        index: u16,
    ) -> Result<(), CoreError> {
        for id in [from, to] {
            if self.node(id).is_none() {
                return Err(CoreError::NodeNotFound { id });
            }
        }
        if from == to {
            return Err(CoreError::InvalidEdge {
                reason: format!("{} edge from node {} to itself", role, from),
            });
        }
        self.graph
            .add_edge(from.into(), to.into(), Edge::new(role, index));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Builders
    // -----------------------------------------------------------------------

    pub fn add_var(&mut self, key: impl Into<VarKey>) -> NodeId {
        self.add_node(NodeKind::Var { key: key.into() })
    }

    pub fn add_num(&mut self, value: f64) -> NodeId {
        self.add_node(NodeKind::Num { value })
    }

    pub fn add_binop(
        &mut self,
        op: BinOp,
        left: NodeId,
        right: NodeId,
    ) -> Result<NodeId, CoreError> {
        let node = self.add_node(NodeKind::BinOp { op });
        self.add_edge(left, node, EdgeRole::Left, 0)?;
        self.add_edge(right, node, EdgeRole::Right, 0)?;
        Ok(node)
    }

    pub fn add_unary(&mut self, op: UnaryOp, operand: NodeId) -> Result<NodeId, CoreError> {
        let node = self.add_node(NodeKind::UnaryOp { op });
        self.add_edge(operand, node, EdgeRole::Operand, 0)?;
        Ok(node)
    }

    pub fn add_call(&mut self, callee: Callee, args: &[NodeId]) -> Result<NodeId, CoreError> {
        let node = self.add_node(NodeKind::Call { callee });
        for (i, &arg) in args.iter().enumerate() {
            self.add_edge(arg, node, EdgeRole::Argument, i as u16)?;
        }
        Ok(node)
    }

    pub fn add_if_exp(
        &mut self,
        condition: NodeId,
        then: NodeId,
        otherwise: NodeId,
    ) -> Result<NodeId, CoreError> {
        let node = self.add_node(NodeKind::IfExp);
        self.add_edge(condition, node, EdgeRole::Condition, 0)?;
        self.add_edge(then, node, EdgeRole::Then, 0)?;
        self.add_edge(otherwise, node, EdgeRole::Else, 0)?;
        Ok(node)
    }

    /// Adds a (possibly chained) comparison `left op0 c0 op1 c1 ...`.
    pub fn add_compare(
        &mut self,
        left: NodeId,
        chain: &[(CmpOp, NodeId)],
    ) -> Result<NodeId, CoreError> {
        let ops = chain.iter().map(|(op, _)| *op).collect();
        let node = self.add_node(NodeKind::Compare { ops });
        self.add_edge(left, node, EdgeRole::Left, 0)?;
        for (i, (_, comparator)) in chain.iter().enumerate() {
            self.add_edge(*comparator, node, EdgeRole::Comparator, i as u16)?;
        }
        Ok(node)
    }

    /// Adds an assignment writing `value` into every node in `targets`.
    pub fn add_assign(&mut self, targets: &[NodeId], value: NodeId) -> Result<NodeId, CoreError> {
        let node = self.add_node(NodeKind::Assign);
        self.add_edge(value, node, EdgeRole::Value, 0)?;
        for (i, &target) in targets.iter().enumerate() {
            self.add_edge(node, target, EdgeRole::Target, i as u16)?;
        }
        Ok(node)
    }

    pub fn add_aug_assign(&mut self, target: NodeId, value: NodeId) -> Result<NodeId, CoreError> {
        let node = self.add_node(NodeKind::AugAssign);
        self.add_edge(value, node, EdgeRole::Value, 0)?;
        self.add_edge(node, target, EdgeRole::Target, 0)?;
        Ok(node)
    }

    /// Adds a conditional statement owning `test` (comparison expressions)
    /// and `body` (statements) sub-graphs.
    pub fn add_if(&mut self, test: EquationGraph, body: EquationGraph) -> NodeId {
        self.add_node(NodeKind::If {
            test: Box::new(test),
            body: Box::new(body),
        })
    }

    // -----------------------------------------------------------------------
    // Validation and ordering
    // -----------------------------------------------------------------------

    /// Checks the per-kind edge invariants on every node, recursing into
    /// conditional-statement sub-graphs.
    pub fn validate(&self) -> Result<(), CoreError> {
        for idx in self.graph.node_indices() {
            let node = NodeId::from(idx);
            let kind = &self.graph[idx].kind;
            let rules = kind.edge_rules();

            for role in ALL_ROLES {
                let found = self.operands(node, role).len();
                match rules.iter().find(|(r, _)| *r == role) {
                    Some((_, arity)) if !arity.admits(found) => {
                        return Err(CoreError::ArityMismatch {
                            node,
                            kind: kind.name(),
                            role: role.name(),
                            expected: arity.describe(),
                            found,
                        });
                    }
                    None if found > 0 => {
                        return Err(CoreError::ArityMismatch {
                            node,
                            kind: kind.name(),
                            role: role.name(),
                            expected: "exactly 0".to_string(),
                            found,
                        });
                    }
                    _ => {}
                }
            }

            for target in self.targets(node) {
                if !matches!(self.kind(target)?, NodeKind::Var { .. }) {
                    return Err(CoreError::InvalidEdge {
                        reason: format!(
                            "TARGET edge from node {} points at non-variable node {}",
                            node, target
                        ),
                    });
                }
            }

            if let NodeKind::If { test, body } = kind {
                test.validate()?;
                body.validate()?;
            }
        }
        Ok(())
    }

    /// Best-effort dependency order of the nodes.
    ///
    /// When the graph contains a cycle a warning is logged; with
    /// `ignore_cyclic` the insertion order is returned instead, otherwise
    /// the cycle is reported as an error.
    pub fn topological_nodes(&self, ignore_cyclic: bool) -> Result<Vec<NodeId>, CoreError> {
        match toposort(&self.graph, None) {
            Ok(order) => Ok(order.into_iter().map(NodeId::from).collect()),
            Err(cycle) => {
                let node = NodeId::from(cycle.node_id());
                tracing::warn!(
                    graph = %self.label,
                    node = %node,
                    "cyclic dependency in equation graph"
                );
                if ignore_cyclic {
                    Ok(self.nodes())
                } else {
                    Err(CoreError::Cycle {
                        graph: self.label.clone(),
                        node,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::MathFn;

    fn x_equals_a_times_b() -> (EquationGraph, NodeId) {
        let mut g = EquationGraph::new("eq");
        let a = g.add_var("a");
        let b = g.add_var("b");
        let mul = g.add_binop(BinOp::Mul, a, b).unwrap();
        let x = g.add_var("x");
        let assign = g.add_assign(&[x], mul).unwrap();
        (g, assign)
    }

    #[test]
    fn builder_wires_roles() {
        let (g, assign) = x_equals_a_times_b();
        let value = g.operand(assign, EdgeRole::Value).unwrap();
        assert!(matches!(g.kind(value).unwrap(), NodeKind::BinOp { op: BinOp::Mul }));
        let left = g.operand(value, EdgeRole::Left).unwrap();
        assert!(matches!(g.kind(left).unwrap(), NodeKind::Var { key } if key.as_str() == "a"));
        let targets = g.targets(assign);
        assert_eq!(targets.len(), 1);
        g.validate().unwrap();
    }

    #[test]
    fn call_arguments_keep_edge_order() {
        let mut g = EquationGraph::new("call");
        let y = g.add_var("y");
        let x = g.add_var("x");
        let call = g.add_call(Callee::Math(MathFn::Atan2), &[y, x]).unwrap();
        assert_eq!(g.operands(call, EdgeRole::Argument), vec![y, x]);
    }

    #[test]
    fn operand_reports_missing_edge() {
        let mut g = EquationGraph::new("bad");
        let a = g.add_var("a");
        let neg = g.add_node(NodeKind::UnaryOp { op: UnaryOp::Neg });
        let err = g.operand(neg, EdgeRole::Operand).unwrap_err();
        assert!(matches!(err, CoreError::ArityMismatch { found: 0, .. }));
        g.add_edge(a, neg, EdgeRole::Operand, 0).unwrap();
        assert_eq!(g.operand(neg, EdgeRole::Operand).unwrap(), a);
    }

    #[test]
    fn validate_rejects_binop_without_right() {
        let mut g = EquationGraph::new("bad");
        let a = g.add_var("a");
        let add = g.add_node(NodeKind::BinOp { op: BinOp::Add });
        g.add_edge(a, add, EdgeRole::Left, 0).unwrap();
        let err = g.validate().unwrap_err();
        assert!(matches!(
            err,
            CoreError::ArityMismatch { role: "RIGHT", found: 0, .. }
        ));
    }

    #[test]
    fn validate_rejects_unexpected_role() {
        let mut g = EquationGraph::new("bad");
        let a = g.add_var("a");
        let b = g.add_var("b");
        g.add_edge(a, b, EdgeRole::Left, 0).unwrap();
        assert!(g.validate().is_err());
    }

    #[test]
    fn validate_rejects_target_on_literal() {
        let mut g = EquationGraph::new("bad");
        let one = g.add_num(1.0);
        let two = g.add_num(2.0);
        g.add_assign(&[two], one).unwrap();
        assert!(matches!(g.validate(), Err(CoreError::InvalidEdge { .. })));
    }

    #[test]
    fn validate_recurses_into_sub_graphs() {
        let mut body = EquationGraph::new("body");
        body.add_node(NodeKind::Assign);
        let mut g = EquationGraph::new("outer");
        g.add_if(EquationGraph::new("test"), body);
        assert!(g.validate().is_err());
    }

    #[test]
    fn add_edge_rejects_unknown_node() {
        let mut g = EquationGraph::new("g");
        let a = g.add_var("a");
        let err = g.add_edge(a, NodeId(99), EdgeRole::Value, 0).unwrap_err();
        assert!(matches!(err, CoreError::NodeNotFound { id: NodeId(99) }));
    }

    #[test]
    fn nodes_are_in_insertion_order() {
        let (g, _) = x_equals_a_times_b();
        let ids: Vec<u32> = g.nodes().iter().map(|n| n.0).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn topological_order_puts_operands_first() {
        let (g, assign) = x_equals_a_times_b();
        let order = g.topological_nodes(false).unwrap();
        let pos = |id: NodeId| order.iter().position(|n| *n == id).unwrap();
        assert!(pos(NodeId(2)) < pos(assign));
    }

    #[test]
    fn cyclic_graph_falls_back_to_insertion_order() {
        // a = b + 1 and b = a * 2 sharing variable nodes form a cycle.
        let mut g = EquationGraph::new("loop");
        let a = g.add_var("a");
        let b = g.add_var("b");
        let one = g.add_num(1.0);
        let two = g.add_num(2.0);
        let sum = g.add_binop(BinOp::Add, b, one).unwrap();
        g.add_assign(&[a], sum).unwrap();
        let prod = g.add_binop(BinOp::Mul, a, two).unwrap();
        g.add_assign(&[b], prod).unwrap();

        assert_eq!(g.topological_nodes(true).unwrap(), g.nodes());
        assert!(matches!(
            g.topological_nodes(false),
            Err(CoreError::Cycle { .. })
        ));
    }

    #[test]
    fn variable_keys_include_sub_graphs() {
        let mut test = EquationGraph::new("test");
        let a = test.add_var("a");
        let zero = test.add_num(0.0);
        test.add_compare(a, &[(CmpOp::Gt, zero)]).unwrap();
        let mut body = EquationGraph::new("body");
        let y = body.add_var("y");
        let one = body.add_num(1.0);
        body.add_assign(&[y], one).unwrap();

        let mut g = EquationGraph::new("outer");
        g.add_var("z");
        g.add_if(test, body);
        let keys: Vec<String> = g.variable_keys().into_iter().map(|k| k.0).collect();
        assert_eq!(keys, vec!["z", "a", "y"]);
    }

    #[test]
    fn serde_roundtrip_preserves_structure() {
        let (g, assign) = x_equals_a_times_b();
        let json = serde_json::to_string(&g).unwrap();
        let back: EquationGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back.label(), "eq");
        assert_eq!(back.node_count(), g.node_count());
        assert_eq!(back.targets(assign), g.targets(assign));
        back.validate().unwrap();
    }
}
