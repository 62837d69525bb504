//! Summation reduction kernel.

use ndarray::Array3;

use crate::tables::SummationTable;

/// Writes into every destination slot the sum of its source slots.
///
/// Destinations are overwritten, not accumulated into. Triplets must be in
/// bounds for `vars`; [`FlatModel`](crate::FlatModel) checks this once at
/// construction.
pub fn sum_mappings(table: &SummationTable, vars: &mut Array3<f64>) {
    for (dest, sources) in table.groups() {
        let total: f64 = sources.map(|src| vars[src]).sum();
        vars[dest] = total;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::IndexTable;
    use proptest::prelude::*;

    fn three_into_one(order: Vec<usize>) -> SummationTable {
        SummationTable::new(
            IndexTable::from_triplets(&[[0, 0, 3]]),
            IndexTable::from_triplets(&[[0, 0, 0], [0, 0, 1], [0, 0, 2]]),
            order,
            vec![3],
        )
        .unwrap()
    }

    #[test]
    fn one_two_three_sum_to_six() {
        let mut vars = Array3::zeros((1, 1, 4));
        vars[[0, 0, 0]] = 1.0;
        vars[[0, 0, 1]] = 2.0;
        vars[[0, 0, 2]] = 3.0;
        vars[[0, 0, 3]] = 99.0;
        sum_mappings(&three_into_one(vec![0, 1, 2]), &mut vars);
        assert_eq!(vars[[0, 0, 3]], 6.0);
    }

    #[test]
    fn empty_run_writes_zero() {
        let table = SummationTable::new(
            IndexTable::from_triplets(&[[0, 0, 0]]),
            IndexTable::default(),
            vec![],
            vec![0],
        )
        .unwrap();
        let mut vars = Array3::from_elem((1, 1, 1), 4.0);
        sum_mappings(&table, &mut vars);
        assert_eq!(vars[[0, 0, 0]], 0.0);
    }

    proptest! {
        #[test]
        fn sum_is_independent_of_source_order(
            values in proptest::collection::vec(-1000i32..1000, 3),
            order in Just(vec![0usize, 1, 2]).prop_shuffle(),
        ) {
            let mut vars = Array3::zeros((1, 1, 4));
            for (k, v) in values.iter().enumerate() {
                vars[[0, 0, k]] = f64::from(*v);
            }
            sum_mappings(&three_into_one(order), &mut vars);
            let expected: i32 = values.iter().sum();
            prop_assert_eq!(vars[[0, 0, 3]], f64::from(expected));
        }
    }
}
