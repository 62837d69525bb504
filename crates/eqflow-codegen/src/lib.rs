//! Compiler from equation graphs to callable routines.
//!
//! The pipeline is: [`binder`] fixes the calling convention, [`lower`]
//! turns graph nodes into the [`ast`] form, and a backend materializes it.
//! The generic backend ([`function::EquationFunction`]) evaluates the
//! lowered tree directly; the native backend (`llvm` feature) JIT-compiles
//! it through inkwell.
//!
//! # Modules
//!
//! - [`error`] -- Error types for all compilation failure modes
//! - [`binder`] -- Two-pass variable ordering and reference construction
//! - [`lower`] -- Expression/statement lowering
//! - [`signature`] -- Typed signature strings
//! - [`cache`] -- Compile-once function cache
//! - `codegen` / `runtime` -- LLVM IR emission and JIT support (`llvm`)

pub mod ast;
pub mod binder;
pub mod cache;
pub mod compiler;
pub mod error;
pub mod function;
pub mod imports;
pub mod lower;
pub mod signature;

#[cfg(feature = "llvm")]
pub mod codegen;
#[cfg(feature = "llvm")]
pub mod runtime;

pub use binder::{ArgMetadata, VariableBinder};
pub use cache::FunctionCache;
pub use compiler::{compile, compile_with_imports};
pub use error::CodegenError;
pub use function::{CompiledEquation, EquationFunction, Returned};
pub use imports::{ExternFn, ExternalFunction, Imports};

#[cfg(feature = "llvm")]
pub use compiler::{compile_native, compile_native_to_ir};
#[cfg(feature = "llvm")]
pub use runtime::NativeFunction;

use serde::{Deserialize, Serialize};

/// Optimization level for the native backend.
///
/// Maps directly to LLVM's `default<ON>` pass pipeline.
/// Default is `O2`: equations are compiled once and evaluated many times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OptLevel {
    /// No optimization (fastest compilation, easiest debugging).
    O0,
    /// Basic optimizations.
    O1,
    /// Standard optimizations.
    #[default]
    O2,
    /// Aggressive optimizations (including vectorization).
    O3,
}

/// Options controlling native compilation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompileOptions {
    /// LLVM optimization level.
    #[serde(default)]
    pub opt_level: OptLevel,
}
