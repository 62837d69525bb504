//! Property tests over randomly built expression graphs.

use std::collections::HashMap;

use eqflow_core::{BinOp, Callee, EquationGraph, MathFn, NodeId, UnaryOp};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Tree {
    Var(u8),
    Num(i16),
    Bin(BinOp, Box<Tree>, Box<Tree>),
    Neg(Box<Tree>),
    Sin(Box<Tree>),
}

fn tree() -> impl Strategy<Value = Tree> {
    let leaf = prop_oneof![(0u8..4).prop_map(Tree::Var), any::<i16>().prop_map(Tree::Num)];
    leaf.prop_recursive(5, 48, 2, |inner| {
        prop_oneof![
            (
                prop_oneof![Just(BinOp::Add), Just(BinOp::Mul), Just(BinOp::Pow)],
                inner.clone(),
                inner.clone()
            )
                .prop_map(|(op, l, r)| Tree::Bin(op, Box::new(l), Box::new(r))),
            inner.clone().prop_map(|t| Tree::Neg(Box::new(t))),
            inner.prop_map(|t| Tree::Sin(Box::new(t))),
        ]
    })
}

fn build(g: &mut EquationGraph, t: &Tree) -> NodeId {
    match t {
        Tree::Var(k) => g.add_var(format!("v{}", k)),
        Tree::Num(n) => g.add_num(f64::from(*n)),
        Tree::Bin(op, l, r) => {
            let l = build(g, l);
            let r = build(g, r);
            g.add_binop(*op, l, r).unwrap()
        }
        Tree::Neg(x) => {
            let x = build(g, x);
            g.add_unary(UnaryOp::Neg, x).unwrap()
        }
        Tree::Sin(x) => {
            let x = build(g, x);
            g.add_call(Callee::Math(MathFn::Sin), &[x]).unwrap()
        }
    }
}

proptest! {
    #[test]
    fn built_graphs_validate_and_sort_operands_first(trees in prop::collection::vec(tree(), 1..4)) {
        let mut g = EquationGraph::new("random");
        for (k, t) in trees.iter().enumerate() {
            let value = build(&mut g, t);
            let target = g.add_var(format!("out{}", k));
            g.add_assign(&[target], value).unwrap();
        }
        prop_assert!(g.validate().is_ok());

        let order = g.topological_nodes(false).unwrap();
        prop_assert_eq!(order.len(), g.node_count());
        let rank: HashMap<NodeId, usize> = order.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        for edge in g.inner().edge_references() {
            let from = NodeId::from(edge.source());
            let to = NodeId::from(edge.target());
            prop_assert!(rank[&from] < rank[&to]);
        }
    }

    #[test]
    fn json_round_trip_preserves_structure(t in tree()) {
        let mut g = EquationGraph::new("json");
        let value = build(&mut g, &t);
        let y = g.add_var("y");
        g.add_assign(&[y], value).unwrap();

        let back: EquationGraph = serde_json::from_str(&serde_json::to_string(&g).unwrap()).unwrap();
        prop_assert_eq!(back.node_count(), g.node_count());
        prop_assert_eq!(back.variable_keys(), g.variable_keys());
        prop_assert!(back.validate().is_ok());
    }
}
