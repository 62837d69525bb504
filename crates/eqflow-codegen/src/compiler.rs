//! Compile entry points.
//!
//! [`compile`] and [`compile_with_imports`] produce the generic
//! [`EquationFunction`]. With the `llvm` feature, [`compile_native`] runs
//! the same binding and lowering, emits LLVM IR, optimizes it and loads it
//! into an MCJIT execution engine, returning a [`NativeFunction`];
//! [`compile_native_to_ir`] stops after optimization and returns the IR
//! text instead.
//!
//! Every failure aborts the compile. Nothing is retried: a broken equation
//! graph is rejected here rather than at simulation time.

use eqflow_core::EquationGraph;

use crate::binder::ArgMetadata;
use crate::error::CodegenError;
use crate::function::EquationFunction;
use crate::imports::Imports;
use crate::lower::function_from_graph;

#[cfg(feature = "llvm")]
use inkwell::{
    context::Context,
    module::Module,
    passes::PassBuilderOptions,
    targets::{CodeModel, InitializationConfig, RelocMode, Target, TargetMachine},
    OptimizationLevel,
};

#[cfg(feature = "llvm")]
use crate::codegen::{self, EmittedNames, SymbolMap};
#[cfg(feature = "llvm")]
use crate::runtime::{NativeFunction, PackedFn};
#[cfg(feature = "llvm")]
use crate::{CompileOptions, OptLevel};

/// Compiles `graph` to a generic callable with no imports.
pub fn compile(
    graph: &EquationGraph,
    hint: &[ArgMetadata],
) -> Result<EquationFunction, CodegenError> {
    compile_with_imports(graph, hint, &Imports::new())
}

/// Compiles `graph` to a generic callable, resolving external callees
/// against `imports`.
pub fn compile_with_imports(
    graph: &EquationGraph,
    hint: &[ArgMetadata],
    imports: &Imports,
) -> Result<EquationFunction, CodegenError> {
    let (def, _) = function_from_graph(graph, hint, imports)?;
    let function = EquationFunction::new(def)?;
    tracing::debug!(
        function = graph.label(),
        signature = function.signature(),
        "compiled generic equation function"
    );
    Ok(function)
}

/// Compiles `graph` to a JIT-compiled native function.
///
/// The LLVM context and execution engine are leaked so the returned entry
/// point outlives this call; compile once per model, not per step.
#[cfg(feature = "llvm")]
pub fn compile_native(
    graph: &EquationGraph,
    hint: &[ArgMetadata],
    imports: &Imports,
    options: &CompileOptions,
) -> Result<NativeFunction, CodegenError> {
    let (def, _) = function_from_graph(graph, hint, imports)?;
    let names = EmittedNames::for_function(&def.name);

    init_native_target()?;
    let context: &'static Context = Box::leak(Box::new(Context::create()));
    let module = context.create_module(&def.name);
    let symbols = build_module(context, &module, &def, options)?;

    let engine = module
        .create_jit_execution_engine(opt_to_llvm(options.opt_level))
        .map_err(|e| compile_failure(&def, &module, e.to_string()))?;
    for (symbol, addr) in &symbols {
        if let Some(decl) = module.get_function(symbol) {
            engine.add_global_mapping(&decl, *addr);
        }
    }

    let entry: PackedFn = unsafe {
        engine
            .get_function::<PackedFn>(&names.packed)
            .map_err(|e| compile_failure(&def, &module, e.to_string()))?
            .as_raw()
    };
    // Keep the engine (and the module it owns) alive for the process.
    std::mem::forget(engine);
    std::mem::forget(module);

    let signature = crate::signature::signature(&def.params);
    tracing::debug!(
        function = %def.name,
        signature = %signature,
        opt_level = ?options.opt_level,
        "materialized native equation function"
    );
    Ok(NativeFunction {
        name: def.name.clone(),
        entry,
        signature,
        arg_keys: def.arg_keys(),
        target_positions: def.target_positions(),
    })
}

/// Same pipeline as [`compile_native`] but returns the optimized LLVM IR
/// instead of loading it.
#[cfg(feature = "llvm")]
pub fn compile_native_to_ir(
    graph: &EquationGraph,
    hint: &[ArgMetadata],
    imports: &Imports,
    options: &CompileOptions,
) -> Result<String, CodegenError> {
    let (def, _) = function_from_graph(graph, hint, imports)?;
    init_native_target()?;
    let context = Context::create();
    let module = context.create_module(&def.name);
    build_module(&context, &module, &def, options)?;
    Ok(module.print_to_string().to_string())
}

#[cfg(feature = "llvm")]
fn init_native_target() -> Result<(), CodegenError> {
    Target::initialize_native(&InitializationConfig::default()).map_err(|e| {
        CodegenError::LlvmError(format!("failed to initialize native target: {}", e))
    })
}

/// Emits, verifies and optimizes the module for `def`.
#[cfg(feature = "llvm")]
fn build_module<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    def: &crate::ast::FunctionDef,
    options: &CompileOptions,
) -> Result<SymbolMap, CodegenError> {
    let triple = TargetMachine::get_default_triple();
    module.set_triple(&triple);

    let builder = context.create_builder();
    let symbols = codegen::emit_function(context, module, &builder, def)?;

    module
        .verify()
        .map_err(|e| compile_failure(def, module, e.to_string()))?;

    let target = Target::from_triple(&triple).map_err(|e| {
        CodegenError::LlvmError(format!("failed to create target from triple: {}", e))
    })?;
    let target_machine = target
        .create_target_machine(
            &triple,
            "generic",
            "",
            opt_to_llvm(options.opt_level),
            RelocMode::Default,
            CodeModel::JITDefault,
        )
        .ok_or_else(|| CodegenError::LlvmError("failed to create target machine".to_string()))?;

    let pass_str = match options.opt_level {
        OptLevel::O0 => "default<O0>",
        OptLevel::O1 => "default<O1>",
        OptLevel::O2 => "default<O2>",
        OptLevel::O3 => "default<O3>",
    };
    module
        .run_passes(pass_str, &target_machine, PassBuilderOptions::create())
        .map_err(|e| CodegenError::LlvmError(format!("optimization passes failed: {}", e)))?;
    Ok(symbols)
}

#[cfg(feature = "llvm")]
fn compile_failure(
    def: &crate::ast::FunctionDef,
    module: &Module<'_>,
    message: String,
) -> CodegenError {
    tracing::error!(function = %def.name, %message, "native compilation failed");
    CodegenError::CompileFailure {
        function: def.name.clone(),
        message,
        generated: format!("{}\n\n{}", def, module.print_to_string().to_string()),
    }
}

/// Map `OptLevel` to inkwell's `OptimizationLevel`.
#[cfg(feature = "llvm")]
fn opt_to_llvm(level: OptLevel) -> OptimizationLevel {
    match level {
        OptLevel::O0 => OptimizationLevel::None,
        OptLevel::O1 => OptimizationLevel::Less,
        OptLevel::O2 => OptimizationLevel::Default,
        OptLevel::O3 => OptimizationLevel::Aggressive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Returned;
    use eqflow_core::{BinOp, MathFn};

    #[cfg(feature = "llvm")]
    #[test]
    fn opt_to_llvm_mapping() {
        assert_eq!(opt_to_llvm(OptLevel::O0), OptimizationLevel::None);
        assert_eq!(opt_to_llvm(OptLevel::O1), OptimizationLevel::Less);
        assert_eq!(opt_to_llvm(OptLevel::O2), OptimizationLevel::Default);
        assert_eq!(opt_to_llvm(OptLevel::O3), OptimizationLevel::Aggressive);
    }

    #[test]
    fn compile_reports_keys_and_positions() {
        let mut g = EquationGraph::new("eq");
        let t = g.add_var("t");
        let s = g.add_call(eqflow_core::Callee::Math(MathFn::Sin), &[t]).unwrap();
        let y = g.add_var("y");
        g.add_assign(&[y], s).unwrap();
        let two = g.add_num(2.0);
        let tt = g.add_binop(BinOp::Mul, t, two).unwrap();
        let z = g.add_var("z");
        g.add_assign(&[z], tt).unwrap();

        let f = compile(&g, &[]).unwrap();
        let keys: Vec<String> = f.def().arg_keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["t", "y", "z"]);
        assert_eq!(f.def().target_positions(), vec![1, 2]);
        match f.call(&[0.5, 0.0, 0.0]).unwrap() {
            Returned::Tuple(v) => {
                assert!((v[0] - 0.5f64.sin()).abs() < 1e-12);
                assert_eq!(v[1], 1.0);
            }
            other => panic!("expected tuple, got {:?}", other),
        }
    }
}
