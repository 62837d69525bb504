//! Native backend tests: JIT-compiled functions must agree with the
//! generic evaluator.
//!
//! Only built with `--features llvm`.
#![cfg(feature = "llvm")]

use eqflow_codegen::{
    compile, compile_native, compile_native_to_ir, CompileOptions, CompiledEquation, Imports,
    OptLevel,
};
use eqflow_core::{BinOp, Callee, CmpOp, EquationGraph, MathFn, UnaryOp};

extern "C" fn sum_and_diff(args: *const f64, out: *mut f64) {
    let args = unsafe { std::slice::from_raw_parts(args, 2) };
    let out = unsafe { std::slice::from_raw_parts_mut(out, 2) };
    out[0] = args[0] + args[1];
    out[1] = args[0] - args[1];
}

fn mixed_graph() -> EquationGraph {
    let mut g = EquationGraph::new("mixed");
    let a = g.add_var("a");
    let b = g.add_var("b");

    let t = g.add_call(Callee::Math(MathFn::Tanh), &[a]).unwrap();
    let p = g.add_binop(BinOp::Pow, b, t).unwrap();
    let m = g.add_binop(BinOp::Mod, p, a).unwrap();
    let y = g.add_var("y");
    g.add_assign(&[y], m).unwrap();

    let cmp = g.add_compare(a, &[(CmpOp::Lt, b)]).unwrap();
    let neg = g.add_unary(UnaryOp::Neg, a).unwrap();
    let sel = g.add_if_exp(cmp, neg, b).unwrap();
    g.add_assign(&[y], sel).unwrap();

    let call = g.add_call(Callee::external("sum_and_diff"), &[a, b]).unwrap();
    let s = g.add_var("s");
    let d = g.add_var("d");
    g.add_assign(&[s, d], call).unwrap();
    g
}

fn imports() -> Imports {
    let mut imports = Imports::new();
    imports.register("sum_and_diff", 2, 2, sum_and_diff);
    imports
}

#[test]
fn native_matches_generic() {
    let g = mixed_graph();
    let imports = imports();
    let generic = eqflow_codegen::compile_with_imports(&g, &[], &imports).unwrap();

    for level in [OptLevel::O0, OptLevel::O2] {
        let native = compile_native(&g, &[], &imports, &CompileOptions { opt_level: level }).unwrap();
        assert_eq!(native.signature(), generic.signature());
        assert_eq!(native.arg_keys(), generic.arg_keys());
        assert_eq!(native.target_positions(), generic.target_positions());

        for (b, a) in [(0.5, 2.0), (3.0, 1.5), (1.0, -4.0)] {
            // Parameters are (b, a, y, s, d).
            let mut x = vec![b, a, 0.25, 0.0, 0.0];
            let mut y = x.clone();
            generic.evaluate(&mut x).unwrap();
            native.evaluate(&mut y).unwrap();
            for (gv, nv) in x.iter().zip(&y) {
                assert!((gv - nv).abs() < 1e-12, "{:?} vs {:?}", x, y);
            }
        }
    }
}

#[test]
fn native_modulo_is_floored() {
    let mut g = EquationGraph::new("floor_mod");
    let a = g.add_var("a");
    let b = g.add_var("b");
    let m = g.add_binop(BinOp::Mod, a, b).unwrap();
    let y = g.add_var("y");
    g.add_assign(&[y], m).unwrap();

    let native = compile_native(&g, &[], &Imports::new(), &CompileOptions::default()).unwrap();
    let keys: Vec<&str> = native.arg_keys().iter().map(|k| k.as_str()).collect();
    let pos = |name: &str| keys.iter().position(|k| *k == name).unwrap();
    for (av, bv, expected) in [(-7.0, 2.0, 1.0), (7.0, -2.0, -1.0), (-7.0, -2.0, -1.0), (6.0, 3.0, 0.0)] {
        let mut buf = vec![0.0; keys.len()];
        buf[pos("a")] = av;
        buf[pos("b")] = bv;
        native.evaluate(&mut buf).unwrap();
        assert_eq!(buf[pos("y")], expected, "{} % {}", av, bv);
    }
}

#[test]
fn native_accumulates_into_prior_output() {
    let mut g = EquationGraph::new("acc");
    let x = g.add_var("x");
    let two = g.add_num(2.0);
    g.add_assign(&[x], two).unwrap();
    let three = g.add_num(3.0);
    g.add_assign(&[x], three).unwrap();

    let native = compile_native(&g, &[], &Imports::new(), &CompileOptions::default()).unwrap();
    let mut buf = [100.0];
    native.evaluate(&mut buf).unwrap();
    assert_eq!(buf, [5.0]);
}

#[test]
fn ir_contains_typed_and_packed_functions() {
    let mut g = EquationGraph::new("ir");
    let a = g.add_var("a");
    let y = g.add_var("y");
    g.add_assign(&[y], a).unwrap();

    let options = CompileOptions { opt_level: OptLevel::O0 };
    let ir = compile_native_to_ir(&g, &[], &Imports::new(), &options).unwrap();
    assert!(ir.contains("define void @ir_llvm(double"));
    assert!(ir.contains("define void @ir_packed(ptr"));
}

#[test]
fn native_and_generic_share_signature_grammar() {
    let mut g = EquationGraph::new("sig");
    let a = g.add_var("a");
    let y = g.add_var("y");
    g.add_assign(&[y], a).unwrap();
    let native = compile_native(&g, &[], &Imports::new(), &CompileOptions::default()).unwrap();
    assert_eq!(native.signature(), compile(&g, &[]).unwrap().signature());
    assert_eq!(native.signature(), "void(double, double*)");
}
