// src/reshape.rs
//
// Wide-to-long reshaping.
//
// Each aggregated value column becomes one row; the fields that generated the
// column are recovered through the schema's parse and attached as columns.
// The stratum field is split back into one column per stratification
// dimension. Rows are put in the canonical output order.

use std::cmp::Ordering;
use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::aggregate::{GroupKey, WideTable};
use crate::config::ResultsConfig;
use crate::error::Result;
use crate::schema::{ColumnSchema, Measure, MeasureGroup, STRATUM_FIELD};

/// Sort columns, most significant first. `random_seed` is appended when seeds
/// are disaggregated.
pub const OUTPUT_COLUMN_SORT_ORDER: [&str; 7] =
    ["age", "sex", "year", "risk", "cause", "measure", "input_draw"];

/// Standard column reported with the population measure.
pub const TOTAL_POPULATION_COLUMN: &str = "total_population";

/// Output name of a template field.
pub fn output_field_name(field: &str) -> String {
    let lower = field.to_lowercase();
    match lower.as_str() {
        "age_group" => "age".to_string(),
        "cause_of_death" => "cause".to_string(),
        _ => lower,
    }
}

/// One pivoted value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PivotRow<'a> {
    pub group: &'a GroupKey,
    pub key: &'a str,
    pub value: f64,
}

/// Stack every value column of `wide` into `(group, key, value)` rows.
pub fn pivot(wide: &WideTable) -> Vec<PivotRow<'_>> {
    wide.rows()
        .iter()
        .flat_map(|(group, values)| {
            values.iter().map(move |(key, value)| PivotRow {
                group,
                key: key.as_str(),
                value: *value,
            })
        })
        .collect()
}

/// Stack only the listed columns; columns absent from `wide` are skipped.
pub fn pivot_columns<'a>(wide: &'a WideTable, columns: &'a [String]) -> Vec<PivotRow<'a>> {
    let present: Vec<&String> = columns.iter().filter(|c| wide.has_column(c)).collect();
    wide.rows()
        .iter()
        .flat_map(|(group, values)| {
            present.iter().filter_map(move |key| {
                values.get(key.as_str()).map(|value| PivotRow {
                    group,
                    key: key.as_str(),
                    value: *value,
                })
            })
        })
        .collect()
}

/// One row of a long result table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongRow {
    pub input_draw: u64,
    pub scenario: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<u64>,
    pub measure: String,
    /// Wide column this row came from.
    pub key: String,
    /// Parsed field columns (renamed, with the stratum split per dimension).
    #[serde(flatten)]
    pub fields: IndexMap<String, String>,
    pub value: f64,
}

impl LongRow {
    /// Value of an output column rendered as text, if the row has it.
    pub fn column(&self, name: &str) -> Option<String> {
        match name {
            "input_draw" => Some(self.input_draw.to_string()),
            "scenario" => Some(self.scenario.clone()),
            "random_seed" => self.random_seed.map(|s| s.to_string()),
            "measure" => Some(self.measure.clone()),
            "key" => Some(self.key.clone()),
            "value" => Some(self.value.to_string()),
            other => self.fields.get(other).cloned(),
        }
    }
}

/// Long table for one measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTable {
    pub measure: Measure,
    pub columns: Vec<String>,
    pub rows: Vec<LongRow>,
}

impl LongTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sum of `value` over rows matching every `(column, value)` filter.
    pub fn total(&self, filters: &[(&str, &str)]) -> f64 {
        self.rows
            .iter()
            .filter(|r| {
                filters
                    .iter()
                    .all(|(c, v)| r.column(c).as_deref() == Some(*v))
            })
            .map(|r| r.value)
            .sum()
    }
}

/// Reshape the columns of `measure` in `wide` into a sorted long table.
pub fn reshape(
    wide: &WideTable,
    schema: &ColumnSchema,
    config: &ResultsConfig,
    measure: Measure,
) -> Result<LongTable> {
    let codec = schema.codec(measure)?;
    let strata = config.stratum_index();

    let rows = match measure.group() {
        MeasureGroup::Population => {
            let mut columns = Vec::new();
            if schema
                .standard_columns()
                .iter()
                .any(|c| c == TOTAL_POPULATION_COLUMN)
            {
                columns.push(TOTAL_POPULATION_COLUMN.to_string());
            }
            columns.extend(codec.columns().iter().cloned());

            pivot_columns(wide, &columns)
                .into_iter()
                .map(|p| long_row(p, p.key.to_string(), IndexMap::new()))
                .collect::<Vec<_>>()
        }
        MeasureGroup::ByCause
        | MeasureGroup::StatePersonTime
        | MeasureGroup::TransitionCount
        | MeasureGroup::Births => pivot_columns(wide, codec.columns())
            .into_iter()
            .map(|p| -> Result<LongRow> {
                let parsed = schema.parse(p.key, measure)?;
                let fields = output_fields(&strata, parsed);
                Ok(long_row(p, measure.as_str().to_string(), fields))
            })
            .collect::<Result<Vec<_>>>()?,
    };

    if rows.is_empty() && !wide.is_empty() {
        warn!(%measure, "no columns of this measure in the aggregated output");
    }

    let mut table = LongTable {
        measure,
        columns: Vec::new(),
        rows,
    };
    sort_rows(&mut table, wide.is_disaggregated());
    debug!(%measure, rows = table.len(), "reshaped measure");
    Ok(table)
}

fn long_row(p: PivotRow<'_>, measure: String, fields: IndexMap<String, String>) -> LongRow {
    LongRow {
        input_draw: p.group.input_draw,
        scenario: p.group.scenario.clone(),
        random_seed: p.group.random_seed,
        measure,
        key: p.key.to_string(),
        fields,
        value: p.value,
    }
}

/// Rename parsed fields and expand the stratum into dimension columns.
fn output_fields(
    strata: &HashMap<String, Vec<(String, String)>>,
    parsed: IndexMap<String, String>,
) -> IndexMap<String, String> {
    let mut out = IndexMap::with_capacity(parsed.len());
    for (field, value) in parsed {
        if field == STRATUM_FIELD {
            if let Some(parts) = strata.get(&value) {
                for (dimension, category) in parts {
                    out.entry(dimension.to_lowercase())
                        .or_insert_with(|| category.to_lowercase());
                }
            }
        } else {
            out.insert(output_field_name(&field), value);
        }
    }
    out
}

/// Canonical ordering: the sort columns present in the table, then the other
/// field columns in first-seen order, then scenario and key.
fn sort_rows(table: &mut LongTable, disaggregated: bool) {
    let mut sort_order: Vec<&str> = OUTPUT_COLUMN_SORT_ORDER.to_vec();
    if disaggregated {
        sort_order.push("random_seed");
    }

    let mut others: Vec<String> = Vec::new();
    for row in &table.rows {
        for field in row.fields.keys() {
            if !sort_order.contains(&field.as_str()) && !others.contains(field) {
                others.push(field.clone());
            }
        }
    }
    let present: Vec<String> = sort_order
        .iter()
        .filter(|c| match **c {
            "measure" | "input_draw" => true,
            "random_seed" => disaggregated,
            name => table.rows.iter().any(|r| r.fields.contains_key(name)),
        })
        .map(|c| c.to_string())
        .collect();

    table.rows.sort_by(|a, b| {
        for column in present.iter().chain(others.iter()) {
            let ord = compare_column(a, b, column);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.scenario.cmp(&b.scenario).then_with(|| a.key.cmp(&b.key))
    });

    let mut columns = present;
    columns.extend(others);
    columns.extend(["scenario", "key", "value"].map(String::from));
    table.columns = columns;
}

fn compare_column(a: &LongRow, b: &LongRow, column: &str) -> Ordering {
    match column {
        "input_draw" => a.input_draw.cmp(&b.input_draw),
        "random_seed" => a.random_seed.cmp(&b.random_seed),
        "measure" => a.measure.cmp(&b.measure),
        name => a.fields.get(name).cmp(&b.fields.get(name)),
    }
}
