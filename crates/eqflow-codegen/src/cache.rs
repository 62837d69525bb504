//! Compile-once cache of equation functions.
//!
//! Compilation happens once per distinct graph before the simulation
//! starts; every runtime instance assembled from the same graph then
//! shares the resulting routine through an `Arc`. Entries are keyed by a
//! blake3 hash over the canonical JSON of the graph, the ordering hint and
//! the imports in scope. An import contributes its name, its shape and the
//! address of its host function, so rebinding a name to a different
//! implementation is a miss.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use eqflow_core::EquationGraph;

use crate::binder::ArgMetadata;
use crate::error::CodegenError;
use crate::function::EquationFunction;
use crate::imports::Imports;

/// Content hash identifying one compilation.
pub fn compile_key(
    graph: &EquationGraph,
    hint: &[ArgMetadata],
    imports: &Imports,
) -> Result<blake3::Hash, CodegenError> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&serde_json::to_vec(graph)?);
    hasher.update(b"|hint|");
    hasher.update(&serde_json::to_vec(hint)?);
    hasher.update(b"|imports|");
    for f in imports.iter() {
        hasher.update(f.name.as_bytes());
        hasher.update(&[0]);
        hasher.update(&(f.arity as u64).to_le_bytes());
        hasher.update(&(f.outputs as u64).to_le_bytes());
        hasher.update(&(f.func as usize as u64).to_le_bytes());
    }
    Ok(hasher.finalize())
}

/// Shared store of compiled functions.
///
/// Generic over the function type so the native backend can use the same
/// cache. Compilation runs under the lock: two callers asking for the same
/// key never compile it twice.
#[derive(Debug)]
pub struct FunctionCache<F = EquationFunction> {
    entries: Mutex<HashMap<blake3::Hash, Arc<F>>>,
}

impl<F> Default for FunctionCache<F> {
    fn default() -> Self {
        FunctionCache {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<F> FunctionCache<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached function for this graph, compiling it with
    /// `compile` on a miss. Failed compilations are not cached.
    pub fn get_or_compile<C>(
        &self,
        graph: &EquationGraph,
        hint: &[ArgMetadata],
        imports: &Imports,
        compile: C,
    ) -> Result<Arc<F>, CodegenError>
    where
        C: FnOnce(&EquationGraph, &[ArgMetadata], &Imports) -> Result<F, CodegenError>,
    {
        let key = compile_key(graph, hint, imports)?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(f) = entries.get(&key) {
            tracing::debug!(graph = graph.label(), key = %key.to_hex(), "compile cache hit");
            return Ok(Arc::clone(f));
        }

        tracing::debug!(graph = graph.label(), key = %key.to_hex(), "compile cache miss");
        let compiled = Arc::new(compile(graph, hint, imports)?);
        entries.insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
