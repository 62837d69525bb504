//! External functions callable from equation graphs.
//!
//! Every import uses one C ABI shape, `extern "C" fn(*const f64, *mut f64)`:
//! `arity` arguments are read from the first pointer and `outputs` results
//! are written through the second. A single shape lets the generic backend
//! call imports directly and the native backend map them into the JIT
//! without per-arity plumbing.

use indexmap::IndexMap;

use crate::error::CodegenError;

/// Uniform calling convention for imported functions.
pub type ExternFn = extern "C" fn(args: *const f64, out: *mut f64);

/// An imported function with its declared shape.
#[derive(Debug, Clone)]
pub struct ExternalFunction {
    pub name: String,
    pub arity: usize,
    pub outputs: usize,
    pub func: ExternFn,
}

impl ExternalFunction {
    /// Invokes the function after checking both slices against the declared
    /// shape.
    pub fn call(&self, args: &[f64], out: &mut [f64]) -> Result<(), CodegenError> {
        if args.len() != self.arity {
            return Err(CodegenError::ArgumentCount {
                expected: self.arity,
                got: args.len(),
            });
        }
        if out.len() != self.outputs {
            return Err(CodegenError::OutputCount {
                expected: self.outputs,
                got: out.len(),
            });
        }
        (self.func)(args.as_ptr(), out.as_mut_ptr());
        Ok(())
    }
}

/// The import list handed to the compiler.
#[derive(Debug, Clone, Default)]
pub struct Imports {
    functions: IndexMap<String, ExternalFunction>,
}

impl Imports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `func` under `name`, replacing any previous entry.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        arity: usize,
        outputs: usize,
        func: ExternFn,
    ) -> &mut Self {
        let name = name.into();
        self.functions.insert(
            name.clone(),
            ExternalFunction {
                name,
                arity,
                outputs,
                func,
            },
        );
        self
    }

    pub fn get(&self, name: &str) -> Option<&ExternalFunction> {
        self.functions.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Registered functions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ExternalFunction> {
        self.functions.values()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn sum_and_diff(args: *const f64, out: *mut f64) {
        let args = unsafe { std::slice::from_raw_parts(args, 2) };
        let out = unsafe { std::slice::from_raw_parts_mut(out, 2) };
        out[0] = args[0] + args[1];
        out[1] = args[0] - args[1];
    }

    #[test]
    fn register_and_call() {
        let mut imports = Imports::new();
        imports.register("sum_and_diff", 2, 2, sum_and_diff);
        let f = imports.get("sum_and_diff").unwrap();
        let mut out = [0.0; 2];
        f.call(&[5.0, 3.0], &mut out).unwrap();
        assert_eq!(out, [8.0, 2.0]);
        assert_eq!(imports.names().collect::<Vec<_>>(), vec!["sum_and_diff"]);
    }

    #[test]
    fn call_checks_shape() {
        let mut imports = Imports::new();
        imports.register("sum_and_diff", 2, 2, sum_and_diff);
        let f = imports.get("sum_and_diff").unwrap();

        let mut out = [0.0; 2];
        assert!(matches!(
            f.call(&[1.0], &mut out),
            Err(CodegenError::ArgumentCount { expected: 2, got: 1 })
        ));

        let mut short = [0.0; 1];
        assert!(matches!(
            f.call(&[1.0, 2.0], &mut short),
            Err(CodegenError::OutputCount { expected: 2, got: 1 })
        ));
        assert_eq!(short, [0.0]);
    }
}
