//! Precomputed index tables over the flattened variable tensor.
//!
//! Every simulation variable occupies one `(group, instance, slot)` triplet
//! of the tensor. Tables store triplets as three parallel arrays, the layout
//! a model assembler produces, and are checked once at construction so the
//! hot loop can index without further validation.

use serde::{Deserialize, Serialize};

use eqflow_codegen::function::CompiledEquation;
use eqflow_core::VarKey;

use crate::equations::ArgSource;
use crate::error::RuntimeError;

/// A `(group, instance, slot)` tensor index.
pub type Triplet = [usize; 3];

/// Triplets stored as three equal-length arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawIndexTable")]
pub struct IndexTable {
    groups: Vec<usize>,
    instances: Vec<usize>,
    slots: Vec<usize>,
}

#[derive(Deserialize)]
struct RawIndexTable {
    groups: Vec<usize>,
    instances: Vec<usize>,
    slots: Vec<usize>,
}

impl TryFrom<RawIndexTable> for IndexTable {
    type Error = RuntimeError;

    fn try_from(raw: RawIndexTable) -> Result<Self, Self::Error> {
        IndexTable::new("deserialized", raw.groups, raw.instances, raw.slots)
    }
}

impl IndexTable {
    /// Builds a table; `name` identifies it in the length error.
    pub fn new(
        name: &'static str,
        groups: Vec<usize>,
        instances: Vec<usize>,
        slots: Vec<usize>,
    ) -> Result<Self, RuntimeError> {
        if groups.len() != instances.len() || groups.len() != slots.len() {
            return Err(RuntimeError::TableLength {
                table: name,
                groups: groups.len(),
                instances: instances.len(),
                slots: slots.len(),
            });
        }
        Ok(IndexTable {
            groups,
            instances,
            slots,
        })
    }

    pub fn from_triplets(triplets: &[Triplet]) -> Self {
        IndexTable {
            groups: triplets.iter().map(|t| t[0]).collect(),
            instances: triplets.iter().map(|t| t[1]).collect(),
            slots: triplets.iter().map(|t| t[2]).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Triplet at `position`. Panics when out of range, like slice indexing.
    pub fn get(&self, position: usize) -> Triplet {
        [
            self.groups[position],
            self.instances[position],
            self.slots[position],
        ]
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = Triplet> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    /// Checks every triplet against the tensor shape.
    pub fn check_bounds(&self, name: &'static str, shape: Triplet) -> Result<(), RuntimeError> {
        for (position, index) in self.iter().enumerate() {
            if !in_bounds(index, shape) {
                return Err(RuntimeError::IndexOutOfBounds {
                    table: name,
                    position,
                    index,
                    shape,
                });
            }
        }
        Ok(())
    }
}

pub(crate) fn in_bounds(index: Triplet, shape: Triplet) -> bool {
    index.iter().zip(shape.iter()).all(|(i, n)| i < n)
}

/// Grouped sums: destination `k` receives the sum of the source entries
/// listed in `slice_indices[offset_k .. offset_k + run_lengths[k]]`, where
/// `offset_k` is the sum of the preceding run lengths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSummationTable")]
pub struct SummationTable {
    destinations: IndexTable,
    sources: IndexTable,
    slice_indices: Vec<usize>,
    run_lengths: Vec<usize>,
}

#[derive(Deserialize)]
struct RawSummationTable {
    destinations: IndexTable,
    sources: IndexTable,
    slice_indices: Vec<usize>,
    run_lengths: Vec<usize>,
}

impl TryFrom<RawSummationTable> for SummationTable {
    type Error = RuntimeError;

    fn try_from(raw: RawSummationTable) -> Result<Self, Self::Error> {
        SummationTable::new(
            raw.destinations,
            raw.sources,
            raw.slice_indices,
            raw.run_lengths,
        )
    }
}

impl SummationTable {
    pub fn new(
        destinations: IndexTable,
        sources: IndexTable,
        slice_indices: Vec<usize>,
        run_lengths: Vec<usize>,
    ) -> Result<Self, RuntimeError> {
        if run_lengths.len() != destinations.len() {
            return Err(RuntimeError::Layout {
                reason: format!(
                    "{} summation destination(s) but {} run length(s)",
                    destinations.len(),
                    run_lengths.len()
                ),
            });
        }
        let total: usize = run_lengths.iter().sum();
        if total != slice_indices.len() {
            return Err(RuntimeError::Layout {
                reason: format!(
                    "run lengths cover {} source index(es) but {} are listed",
                    total,
                    slice_indices.len()
                ),
            });
        }
        if let Some(&bad) = slice_indices.iter().find(|&&j| j >= sources.len()) {
            return Err(RuntimeError::Layout {
                reason: format!(
                    "summation source index {} exceeds the {} source entries",
                    bad,
                    sources.len()
                ),
            });
        }
        Ok(SummationTable {
            destinations,
            sources,
            slice_indices,
            run_lengths,
        })
    }

    /// Each destination paired with the triplets it sums.
    pub fn groups(
        &self,
    ) -> impl Iterator<Item = (Triplet, impl Iterator<Item = Triplet> + '_)> + '_ {
        let mut offset = 0;
        self.run_lengths.iter().enumerate().map(move |(k, &len)| {
            let run = &self.slice_indices[offset..offset + len];
            offset += len;
            let sources = &self.sources;
            (self.destinations.get(k), run.iter().map(move |&j| sources.get(j)))
        })
    }

    pub fn destinations(&self) -> &IndexTable {
        &self.destinations
    }

    pub fn sources(&self) -> &IndexTable {
        &self.sources
    }

    /// No sums to reduce.
    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }
}

/// Every table a [`FlatModel`](crate::FlatModel) needs, as produced by
/// model assembly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelTables {
    pub states: IndexTable,
    pub derivatives: IndexTable,
    /// Alias copies: `alias_to[k]` receives `alias_from[k]`.
    #[serde(default)]
    pub alias_to: IndexTable,
    #[serde(default)]
    pub alias_from: IndexTable,
    #[serde(default)]
    pub sums: SummationTable,
    /// Tensor position of every named variable.
    #[serde(default)]
    pub variable_positions: IndexTable,
    /// Dotted variable names exposed through the path-variable snapshot.
    #[serde(default)]
    pub path_names: Vec<String>,
    /// For each path name, its entry in `variable_positions`.
    #[serde(default)]
    pub path_positions: Vec<usize>,
    /// Names of the global scalars, in global-vector order. Index 0 is
    /// simulation time.
    #[serde(default)]
    pub global_names: Vec<String>,
}

impl ModelTables {
    /// Checks cross-table alignment and every triplet against `shape`.
    pub fn validate(&self, shape: Triplet) -> Result<(), RuntimeError> {
        if self.states.len() != self.derivatives.len() {
            return Err(RuntimeError::Layout {
                reason: format!(
                    "{} state(s) but {} derivative(s)",
                    self.states.len(),
                    self.derivatives.len()
                ),
            });
        }
        if self.alias_to.len() != self.alias_from.len() {
            return Err(RuntimeError::Layout {
                reason: format!(
                    "{} alias destination(s) but {} alias source(s)",
                    self.alias_to.len(),
                    self.alias_from.len()
                ),
            });
        }
        if self.path_names.len() != self.path_positions.len() {
            return Err(RuntimeError::Layout {
                reason: format!(
                    "{} path name(s) but {} path position(s)",
                    self.path_names.len(),
                    self.path_positions.len()
                ),
            });
        }
        if let Some(&bad) = self
            .path_positions
            .iter()
            .find(|&&j| j >= self.variable_positions.len())
        {
            return Err(RuntimeError::Layout {
                reason: format!(
                    "path position {} exceeds the {} variable position(s)",
                    bad,
                    self.variable_positions.len()
                ),
            });
        }

        self.states.check_bounds("states", shape)?;
        self.derivatives.check_bounds("derivatives", shape)?;
        self.alias_to.check_bounds("alias_to", shape)?;
        self.alias_from.check_bounds("alias_from", shape)?;
        self.sums.destinations.check_bounds("sum_destinations", shape)?;
        self.sums.sources.check_bounds("sum_sources", shape)?;
        self.variable_positions
            .check_bounds("variable_positions", shape)?;
        Ok(())
    }

    /// Where the variable named `key` lives: a global scalar if it is one
    /// of [`global_names`](Self::global_names), otherwise its tensor slot.
    pub fn resolve(&self, key: &VarKey) -> Option<ArgSource> {
        if let Some(k) = self.global_names.iter().position(|n| n == key.as_str()) {
            return Some(ArgSource::Global(k));
        }
        let p = self.path_names.iter().position(|n| n == key.as_str())?;
        let j = *self.path_positions.get(p)?;
        if j >= self.variable_positions.len() {
            return None;
        }
        let [g, i, s] = self.variable_positions.get(j);
        Some(ArgSource::Tensor(g, i, s))
    }

    /// Resolves every argument of `function` through [`resolve`](Self::resolve).
    pub fn resolve_all(
        &self,
        function: &dyn CompiledEquation,
    ) -> Result<Vec<ArgSource>, RuntimeError> {
        function
            .arg_keys()
            .iter()
            .map(|key| {
                self.resolve(key)
                    .ok_or_else(|| RuntimeError::UnboundVariable {
                        equation: function.name().to_string(),
                        key: key.clone(),
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unequal_arrays_are_rejected() {
        let err = IndexTable::new("states", vec![0, 0], vec![0], vec![0, 1]).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::TableLength {
                table: "states",
                groups: 2,
                instances: 1,
                slots: 2
            }
        ));
    }

    #[test]
    fn deserializing_checks_lengths() {
        let ok: IndexTable =
            serde_json::from_str(r#"{"groups":[0],"instances":[1],"slots":[2]}"#).unwrap();
        assert_eq!(ok.get(0), [0, 1, 2]);
        let bad = r#"{"groups":[0],"instances":[],"slots":[2]}"#;
        assert!(serde_json::from_str::<IndexTable>(bad).is_err());
    }

    #[test]
    fn bounds_are_checked_per_axis() {
        let table = IndexTable::from_triplets(&[[0, 0, 0], [0, 1, 3]]);
        assert!(table.check_bounds("t", [1, 2, 4]).is_ok());
        let err = table.check_bounds("t", [1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::IndexOutOfBounds { position: 1, index: [0, 1, 3], .. }
        ));
    }

    #[test]
    fn summation_groups_follow_run_lengths() {
        let sums = SummationTable::new(
            IndexTable::from_triplets(&[[0, 0, 5], [0, 0, 6]]),
            IndexTable::from_triplets(&[[0, 0, 0], [0, 0, 1], [0, 0, 2]]),
            vec![2, 0, 1],
            vec![2, 1],
        )
        .unwrap();
        let groups: Vec<(Triplet, Vec<Triplet>)> =
            sums.groups().map(|(d, s)| (d, s.collect())).collect();
        assert_eq!(
            groups,
            vec![
                ([0, 0, 5], vec![[0, 0, 2], [0, 0, 0]]),
                ([0, 0, 6], vec![[0, 0, 1]]),
            ]
        );
    }

    #[test]
    fn summation_layout_errors() {
        let dest = IndexTable::from_triplets(&[[0, 0, 1]]);
        let src = IndexTable::from_triplets(&[[0, 0, 0]]);
        assert!(SummationTable::new(dest.clone(), src.clone(), vec![0], vec![]).is_err());
        assert!(SummationTable::new(dest.clone(), src.clone(), vec![0, 0], vec![1]).is_err());
        assert!(SummationTable::new(dest, src, vec![1], vec![1]).is_err());
    }

    #[test]
    fn resolve_prefers_globals() {
        let tables = ModelTables {
            variable_positions: IndexTable::from_triplets(&[[0, 0, 0], [0, 1, 0]]),
            path_names: vec!["sys.a".into(), "sys.b".into()],
            path_positions: vec![1, 0],
            global_names: vec!["t".into()],
            ..ModelTables::default()
        };
        assert_eq!(tables.resolve(&"t".into()), Some(ArgSource::Global(0)));
        assert_eq!(tables.resolve(&"sys.a".into()), Some(ArgSource::Tensor(0, 1, 0)));
        assert_eq!(tables.resolve(&"sys.b".into()), Some(ArgSource::Tensor(0, 0, 0)));
        assert_eq!(tables.resolve(&"sys.c".into()), None);
    }

    #[test]
    fn model_tables_from_json_with_defaults() {
        let json = r#"{
            "states": {"groups":[0],"instances":[0],"slots":[0]},
            "derivatives": {"groups":[0],"instances":[0],"slots":[1]}
        }"#;
        let tables: ModelTables = serde_json::from_str(json).unwrap();
        assert!(tables.alias_to.is_empty());
        assert!(tables.sums.is_empty());
        assert!(tables.validate([1, 1, 2]).is_ok());
        assert!(tables.validate([1, 1, 1]).is_err());
    }
}
