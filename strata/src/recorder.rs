// src/recorder.rs
//
// Per-run metric accumulator.
//
// Observers add amounts to schema-encoded columns during the run; the final
// metrics are pulled once at the end (`metrics`). Every declared column is
// present in the pulled map, zero-filled when nothing was recorded, so the
// wide table of every run has the same shape.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::schema::{ColumnSchema, Measure, STRATUM_FIELD};

#[derive(Debug, Clone)]
pub struct MetricRecorder {
    schema: Arc<ColumnSchema>,
    values: BTreeMap<String, f64>,
}

impl MetricRecorder {
    pub fn new(schema: Arc<ColumnSchema>) -> Self {
        Self {
            schema,
            values: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &ColumnSchema {
        &self.schema
    }

    /// Add `amount` to the column of `measure` identified by `fields` and
    /// `stratum`. The stratum is ignored for measures whose template does not
    /// reference it.
    pub fn record<K, V>(
        &mut self,
        measure: Measure,
        fields: &[(K, V)],
        stratum: &str,
        amount: f64,
    ) -> Result<()>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let codec = self.schema.codec(measure)?;
        let mut values: Vec<(&str, &str)> = fields
            .iter()
            .map(|(k, v)| (k.as_ref(), v.as_ref()))
            .collect();
        if codec.fields().iter().any(|f| f == STRATUM_FIELD) {
            values.push((STRATUM_FIELD, stratum));
        }
        let column = self.schema.encode(measure, &values)?;
        *self.values.entry(column).or_insert(0.0) += amount;
        Ok(())
    }

    /// Add to one of the unstratified standard columns.
    pub fn record_standard(&mut self, column: &str, amount: f64) -> Result<()> {
        if !self.schema.standard_columns().iter().any(|c| c == column) {
            return Err(Error::config(format!(
                "'{column}' is not a declared standard column"
            )));
        }
        *self.values.entry(column.to_string()).or_insert(0.0) += amount;
        Ok(())
    }

    /// Current value of one column (zero if never recorded).
    pub fn value(&self, column: &str) -> f64 {
        self.values.get(column).copied().unwrap_or(0.0)
    }

    /// Number of columns that received at least one amount.
    pub fn touched(&self) -> usize {
        self.values.len()
    }

    /// Pull every declared column with its accumulated value.
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        self.schema
            .all_columns()
            .into_iter()
            .map(|column| {
                let v = self.value(&column);
                (column, v)
            })
            .collect()
    }
}
