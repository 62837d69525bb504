//! Host-side support for JIT-compiled equations.
//!
//! Built-ins without a portable LLVM intrinsic are implemented here as
//! `extern "C"` shims and mapped into the execution engine by address.
//! [`NativeFunction`] is the handle to a materialized entry point.

use eqflow_core::{MathFn, VarKey};

use crate::error::CodegenError;
use crate::function::CompiledEquation;

extern "C" fn eqflow_tan(x: f64) -> f64 {
    x.tan()
}

extern "C" fn eqflow_atan(x: f64) -> f64 {
    x.atan()
}

extern "C" fn eqflow_tanh(x: f64) -> f64 {
    x.tanh()
}

extern "C" fn eqflow_atan2(y: f64, x: f64) -> f64 {
    y.atan2(x)
}

/// Symbol and host address of the shim for `m`, when it needs one.
pub fn math_shim(m: MathFn) -> Option<(&'static str, usize)> {
    match m {
        MathFn::Tan => Some(("eqflow_tan", eqflow_tan as usize)),
        MathFn::Atan => Some(("eqflow_atan", eqflow_atan as usize)),
        MathFn::Tanh => Some(("eqflow_tanh", eqflow_tanh as usize)),
        MathFn::Atan2 => Some(("eqflow_atan2", eqflow_atan2 as usize)),
        _ => None,
    }
}

/// Packed entry point: every argument in binder order in one buffer.
pub type PackedFn = unsafe extern "C" fn(args: *mut f64);

/// A JIT-compiled equation function.
///
/// The LLVM context and execution engine behind `entry` are leaked when the
/// function is materialized, so the pointer stays valid for the life of the
/// process and the handle can be shared freely.
#[derive(Debug, Clone)]
pub struct NativeFunction {
    pub(crate) name: String,
    pub(crate) entry: PackedFn,
    pub(crate) signature: String,
    pub(crate) arg_keys: Vec<VarKey>,
    pub(crate) target_positions: Vec<usize>,
}

impl NativeFunction {
    /// Typed signature string of the `<name>_llvm` entry point.
    pub fn signature(&self) -> &str {
        &self.signature
    }
}

impl CompiledEquation for NativeFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn arg_keys(&self) -> &[VarKey] {
        &self.arg_keys
    }

    fn target_positions(&self) -> &[usize] {
        &self.target_positions
    }

    fn evaluate(&self, args: &mut [f64]) -> Result<(), CodegenError> {
        if args.len() != self.arg_keys.len() {
            return Err(CodegenError::ArgumentCount {
                expected: self.arg_keys.len(),
                got: args.len(),
            });
        }
        // The adapter reads and writes exactly `arg_keys.len()` slots.
        unsafe { (self.entry)(args.as_mut_ptr()) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shims_match_host_math() {
        assert_eq!(eqflow_tan(0.5), 0.5f64.tan());
        assert_eq!(eqflow_atan2(1.0, -1.0), 1.0f64.atan2(-1.0));
        assert!(math_shim(MathFn::Sin).is_none());
        assert_eq!(math_shim(MathFn::Tanh).map(|(s, _)| s), Some("eqflow_tanh"));
    }
}
