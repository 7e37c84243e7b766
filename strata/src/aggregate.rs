// src/aggregate.rs
//
// Seed aggregation: sum count columns across random seeds within each
// (draw, scenario) group.
//
// Non-count columns are excluded from the output and reported on the table;
// summing them across seeds would be wrong and averaging them is left to the
// caller.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::collect::RunRecord;

/// Row key of the aggregated wide table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub input_draw: u64,
    pub scenario: String,
    /// Present only when seeds are kept disaggregated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct AggregateOptions {
    /// Keep one row per seed instead of summing across seeds.
    pub disaggregate_seeds: bool,
    pub non_count_columns: HashSet<String>,
}

impl AggregateOptions {
    pub fn new(disaggregate_seeds: bool, non_count_columns: impl IntoIterator<Item = String>) -> Self {
        Self {
            disaggregate_seeds,
            non_count_columns: non_count_columns.into_iter().collect(),
        }
    }
}

/// Aggregated wide table: one row per group, one value per column. Every row
/// carries the same column set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WideTable {
    rows: BTreeMap<GroupKey, BTreeMap<String, f64>>,
    columns: BTreeSet<String>,
    excluded: Vec<String>,
    disaggregated: bool,
}

impl WideTable {
    pub fn rows(&self) -> &BTreeMap<GroupKey, BTreeMap<String, f64>> {
        &self.rows
    }

    pub fn get(&self, key: &GroupKey) -> Option<&BTreeMap<String, f64>> {
        self.rows.get(key)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value columns, sorted.
    pub fn value_columns(&self) -> &BTreeSet<String> {
        &self.columns
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(column)
    }

    /// Non-count columns seen in the input but left out of the table.
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    pub fn is_disaggregated(&self) -> bool {
        self.disaggregated
    }
}

/// Sum `records` per (draw, scenario), or per (draw, scenario, seed) when
/// seeds are disaggregated. Columns missing from a record count as zero.
pub fn aggregate(records: &[RunRecord], options: &AggregateOptions) -> WideTable {
    let mut columns = BTreeSet::new();
    let mut excluded = BTreeSet::new();
    for record in records {
        for column in record.values.keys() {
            if options.non_count_columns.contains(column) {
                excluded.insert(column.clone());
            } else {
                columns.insert(column.clone());
            }
        }
    }

    let mut rows: BTreeMap<GroupKey, BTreeMap<String, f64>> = BTreeMap::new();
    for record in records {
        let key = GroupKey {
            input_draw: record.identity.input_draw,
            scenario: record.identity.scenario.clone(),
            random_seed: options
                .disaggregate_seeds
                .then_some(record.identity.random_seed),
        };
        let row = rows
            .entry(key)
            .or_insert_with(|| columns.iter().map(|c| (c.clone(), 0.0)).collect());
        for (column, value) in &record.values {
            if let Some(slot) = row.get_mut(column) {
                *slot += value;
            }
        }
    }

    if !excluded.is_empty() {
        warn!(
            columns = excluded.len(),
            "non-count columns excluded from seed aggregation"
        );
    }
    info!(
        records = records.len(),
        groups = rows.len(),
        columns = columns.len(),
        disaggregated = options.disaggregate_seeds,
        "aggregated over seeds"
    );

    WideTable {
        rows,
        columns,
        excluded: excluded.into_iter().collect(),
        disaggregated: options.disaggregate_seeds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::RunIdentity;

    fn rec(draw: u64, seed: u64, scenario: &str, values: &[(&str, f64)]) -> RunRecord {
        RunRecord::new(
            RunIdentity::new(draw, seed, scenario),
            values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        )
    }

    fn key(draw: u64, scenario: &str) -> GroupKey {
        GroupKey {
            input_draw: draw,
            scenario: scenario.to_string(),
            random_seed: None,
        }
    }

    #[test]
    fn counts_are_summed_across_seeds() {
        let records = vec![
            rec(5, 1, "baseline", &[("deaths_x", 3.0)]),
            rec(5, 2, "baseline", &[("deaths_x", 4.0)]),
        ];
        let wide = aggregate(&records, &AggregateOptions::default());
        assert_eq!(wide.len(), 1);
        assert_eq!(wide.get(&key(5, "baseline")).unwrap()["deaths_x"], 7.0);
    }

    #[test]
    fn groups_are_split_by_draw_and_scenario() {
        let records = vec![
            rec(1, 1, "a", &[("x", 1.0)]),
            rec(1, 1, "b", &[("x", 2.0)]),
            rec(2, 1, "a", &[("x", 4.0)]),
        ];
        let wide = aggregate(&records, &AggregateOptions::default());
        assert_eq!(wide.len(), 3);
        assert_eq!(wide.get(&key(1, "b")).unwrap()["x"], 2.0);
    }

    #[test]
    fn disaggregated_seeds_keep_one_row_per_seed() {
        let records = vec![
            rec(5, 1, "baseline", &[("x", 3.0)]),
            rec(5, 2, "baseline", &[("x", 4.0)]),
        ];
        let wide = aggregate(&records, &AggregateOptions::new(true, Vec::new()));
        assert_eq!(wide.len(), 2);
        assert!(wide.is_disaggregated());
        assert!(wide.rows().keys().all(|k| k.random_seed.is_some()));
    }

    #[test]
    fn non_count_columns_are_excluded_and_reported() {
        let records = vec![rec(5, 1, "baseline", &[("x", 3.0), ("mean_age", 2.5)])];
        let wide = aggregate(
            &records,
            &AggregateOptions::new(false, vec!["mean_age".to_string()]),
        );
        assert!(!wide.has_column("mean_age"));
        assert_eq!(wide.excluded(), ["mean_age".to_string()]);
    }

    #[test]
    fn rows_share_the_column_set() {
        let records = vec![
            rec(1, 1, "a", &[("x", 1.0)]),
            rec(2, 1, "a", &[("y", 2.0)]),
        ];
        let wide = aggregate(&records, &AggregateOptions::default());
        for row in wide.rows().values() {
            assert_eq!(row.len(), 2);
        }
        assert_eq!(wide.get(&key(1, "a")).unwrap()["y"], 0.0);
    }

    #[test]
    fn empty_input_gives_empty_table() {
        let wide = aggregate(&[], &AggregateOptions::default());
        assert!(wide.is_empty());
        assert!(wide.value_columns().is_empty());
    }
}
