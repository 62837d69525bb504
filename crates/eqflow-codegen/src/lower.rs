//! Expression and statement lowering: graph nodes to [`FunctionDef`].
//!
//! [`lower_expr`] dispatches on [`NodeKind`] with an exhaustive match, so a
//! new kind cannot be added to the graph IR without a lowering decision
//! here. Statement bodies are lowered in node insertion order rather than
//! dependency order: a cyclic graph only produces a warning, and the
//! runtime's fixed-point iteration is what settles an algebraic loop.

use std::collections::HashSet;

use petgraph::graph::NodeIndex;
use petgraph::Direction;

use eqflow_core::{Callee, EdgeRole, EquationGraph, NodeId, NodeKind, VarKey};

use crate::ast::{CallTarget, Expr, FunctionDef, Return, Stmt, VarRef};
use crate::binder::{Access, ArgMetadata, VariableBinder};
use crate::error::CodegenError;
use crate::imports::Imports;

/// What lowering reads from while walking a graph.
#[derive(Debug, Clone, Copy)]
pub struct LowerContext<'a> {
    pub binder: &'a VariableBinder,
    pub imports: &'a Imports,
}

/// Lowers a whole graph: binds its variables, lowers the statement body and
/// synthesizes the return of every output.
///
/// Returns the function together with the binder that ordered its
/// parameters.
pub fn function_from_graph(
    graph: &EquationGraph,
    hint: &[ArgMetadata],
    imports: &Imports,
) -> Result<(FunctionDef, VariableBinder), CodegenError> {
    graph.validate()?;
    let binder = VariableBinder::order(graph, hint)?;
    let ctx = LowerContext {
        binder: &binder,
        imports,
    };

    let mut body = lower_body(graph, ctx)?;
    body.push(Stmt::Return(return_statement(graph, &binder)?));

    let def = FunctionDef {
        name: graph.label().to_string(),
        params: binder.params(),
        body,
    };
    tracing::debug!(function = %def.name, params = def.params.len(), "lowered equation graph");
    Ok((def, binder))
}

fn return_statement(graph: &EquationGraph, binder: &VariableBinder) -> Result<Return, CodegenError> {
    let mut refs = binder.target_refs();
    match refs.len() {
        0 => Err(CodegenError::MissingReturn {
            function: graph.label().to_string(),
        }),
        1 => Ok(Return::Single(refs.remove(0))),
        _ => Ok(Return::Tuple(refs)),
    }
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

/// Lowers the statements of `graph` in insertion order.
///
/// Write bookkeeping is scoped to this body: the first single-target write
/// to a key is a plain assignment and later ones accumulate. A nested
/// conditional body starts with its own bookkeeping.
pub fn lower_body(graph: &EquationGraph, ctx: LowerContext<'_>) -> Result<Vec<Stmt>, CodegenError> {
    // Only for the cycle warning; statement order stays positional.
    graph.topological_nodes(true)?;

    let mut written: HashSet<VarKey> = HashSet::new();
    let mut body = Vec::new();
    for node in graph.nodes() {
        match graph.kind(node)? {
            NodeKind::Assign | NodeKind::AugAssign => {
                let value = lower_expr(graph, graph.operand(node, EdgeRole::Value)?, ctx)?;
                body.push(lower_assign(graph, node, value, ctx, &mut written)?);
            }
            NodeKind::If { test, body: inner } => {
                let test = lower_condition(test, ctx)?;
                let inner = lower_body(inner, ctx)?;
                body.push(Stmt::If { test, body: inner });
            }
            // Expressions are reached through the statements consuming them.
            _ => {}
        }
    }
    Ok(body)
}

fn lower_assign(
    graph: &EquationGraph,
    node: NodeId,
    value: Expr,
    ctx: LowerContext<'_>,
    written: &mut HashSet<VarKey>,
) -> Result<Stmt, CodegenError> {
    let mut targets: Vec<VarRef> = Vec::new();
    for target in graph.targets(node) {
        match graph.kind(target)? {
            NodeKind::Var { key } => targets.push(ctx.binder.reference(key, Access::Write)?),
            other => return Err(unsupported(graph, target, other, "target")),
        }
    }

    if targets.len() > 1 {
        if value.outputs() != targets.len() {
            return Err(CodegenError::InvalidGraph(format!(
                "node {} assigns {} value(s) to {} targets",
                node,
                value.outputs(),
                targets.len()
            )));
        }
        for t in &targets {
            written.insert(t.key.clone());
        }
        return Ok(Stmt::AssignTuple { targets, value });
    }

    let value = expect_scalar(value, node)?;
    let target = targets.remove(0);
    if written.insert(target.key.clone()) {
        Ok(Stmt::Assign { target, value })
    } else {
        Ok(Stmt::AugAssign { target, value })
    }
}

/// Lowers a conditional-statement test graph to its list of comparisons.
fn lower_condition(test: &EquationGraph, ctx: LowerContext<'_>) -> Result<Vec<Expr>, CodegenError> {
    let roots = condition_roots(test)?;
    if roots.is_empty() {
        return Err(CodegenError::InvalidGraph(format!(
            "condition graph '{}' has no comparison",
            test.label()
        )));
    }
    roots
        .into_iter()
        .map(|root| match test.kind(root)? {
            NodeKind::Compare { .. } => lower_expr(test, root, ctx),
            other => Err(unsupported(test, root, other, "condition")),
        })
        .collect()
}

/// Nodes of a condition graph that no other node consumes, in dependency
/// order. Each one is a standalone test expression.
pub(crate) fn condition_roots(test: &EquationGraph) -> Result<Vec<NodeId>, CodegenError> {
    let order = test.topological_nodes(true)?;
    Ok(order
        .into_iter()
        .filter(|&n| {
            test.inner()
                .edges_directed(NodeIndex::from(n), Direction::Outgoing)
                .next()
                .is_none()
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// Lowers one expression node and its operands.
pub fn lower_expr(
    graph: &EquationGraph,
    node: NodeId,
    ctx: LowerContext<'_>,
) -> Result<Expr, CodegenError> {
    lower_expr_kind(graph, node, ctx).inspect_err(|e| {
        tracing::debug!(graph = graph.label(), node = %node, error = %e, "while lowering");
    })
}

fn lower_expr_kind(
    graph: &EquationGraph,
    node: NodeId,
    ctx: LowerContext<'_>,
) -> Result<Expr, CodegenError> {
    let scalar = |role: EdgeRole| -> Result<Box<Expr>, CodegenError> {
        let operand = graph.operand(node, role)?;
        let expr = lower_expr(graph, operand, ctx)?;
        Ok(Box::new(expect_scalar(expr, operand)?))
    };

    match graph.kind(node)? {
        NodeKind::Var { key } => Ok(Expr::Var(ctx.binder.reference(key, Access::Read)?)),

        NodeKind::Num { value } => Ok(Expr::Const(*value)),

        NodeKind::BinOp { op } => Ok(Expr::Binary {
            op: *op,
            lhs: scalar(EdgeRole::Left)?,
            rhs: scalar(EdgeRole::Right)?,
        }),

        NodeKind::UnaryOp { op } => Ok(Expr::Unary {
            op: *op,
            operand: scalar(EdgeRole::Operand)?,
        }),

        NodeKind::Call { callee } => {
            let callee = resolve_callee(callee, node, ctx.imports)?;
            let mut args = Vec::new();
            for arg in graph.operands(node, EdgeRole::Argument) {
                args.push(expect_scalar(lower_expr(graph, arg, ctx)?, arg)?);
            }
            if args.len() != callee.arity() {
                return Err(CodegenError::InvalidGraph(format!(
                    "call to '{}' at node {} has {} argument(s), expected {}",
                    callee.name(),
                    node,
                    args.len(),
                    callee.arity()
                )));
            }
            Ok(Expr::Call { callee, args })
        }

        NodeKind::IfExp => Ok(Expr::Select {
            condition: scalar(EdgeRole::Condition)?,
            then: scalar(EdgeRole::Then)?,
            otherwise: scalar(EdgeRole::Else)?,
        }),

        NodeKind::Compare { ops } => {
            let left = scalar(EdgeRole::Left)?;
            let mut comparators = Vec::new();
            for c in graph.operands(node, EdgeRole::Comparator) {
                comparators.push(expect_scalar(lower_expr(graph, c, ctx)?, c)?);
            }
            Ok(Expr::Compare {
                left,
                ops: ops.clone(),
                comparators,
            })
        }

        kind @ (NodeKind::Assign | NodeKind::AugAssign | NodeKind::If { .. }) => {
            Err(unsupported(graph, node, kind, "expression"))
        }
    }
}

fn resolve_callee(
    callee: &Callee,
    node: NodeId,
    imports: &Imports,
) -> Result<CallTarget, CodegenError> {
    match callee {
        Callee::Math(m) => Ok(CallTarget::Math(*m)),
        Callee::External { name } => imports
            .get(name)
            .cloned()
            .map(CallTarget::External)
            .ok_or_else(|| CodegenError::UnknownCallee {
                node,
                name: name.clone(),
            }),
    }
}

fn expect_scalar(expr: Expr, node: NodeId) -> Result<Expr, CodegenError> {
    match expr.outputs() {
        1 => Ok(expr),
        n => Err(CodegenError::InvalidGraph(format!(
            "node {} produces {} values where a scalar is expected",
            node, n
        ))),
    }
}

fn unsupported(
    graph: &EquationGraph,
    node: NodeId,
    kind: &NodeKind,
    position: &'static str,
) -> CodegenError {
    tracing::error!(
        graph = graph.label(),
        node = %node,
        kind = kind.name(),
        position,
        "no lowering rule for node"
    );
    CodegenError::UnsupportedNode {
        node,
        kind: kind.name(),
        position,
    }
}
