// src/population.rs
//
// Columnar population snapshot handed to the stratifier and observers once per
// step. The simulation's state store owns the real table; this is a read-only
// copy of the columns the results layer needs.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub type IndividualId = u64;

/// One cell of the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Label form used when a value is bound into a column template.
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Float(x) => write!(f, "{x}"),
            FieldValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

impl From<f64> for FieldValue {
    fn from(x: f64) -> Self {
        FieldValue::Float(x)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

/// Individuals plus named columns with one value per individual.
#[derive(Debug, Clone, Default)]
pub struct PopulationSnapshot {
    ids: Vec<IndividualId>,
    columns: HashMap<String, Vec<FieldValue>>,
}

impl PopulationSnapshot {
    pub fn new(ids: Vec<IndividualId>) -> Self {
        Self {
            ids,
            columns: HashMap::new(),
        }
    }

    /// Add (or replace) a column. Fails if the length does not match.
    pub fn with_column<V: Into<FieldValue>>(
        mut self,
        name: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self> {
        self.insert_column(name, values.into_iter().map(Into::into).collect())?;
        Ok(self)
    }

    pub fn insert_column(&mut self, name: &str, values: Vec<FieldValue>) -> Result<()> {
        if values.len() != self.ids.len() {
            return Err(Error::ColumnLength {
                column: name.to_string(),
                expected: self.ids.len(),
                found: values.len(),
            });
        }
        self.columns.insert(name.to_string(), values);
        Ok(())
    }

    pub fn ids(&self) -> &[IndividualId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&[FieldValue]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Column lookup that reports who needed it when absent.
    pub fn require(&self, name: &str, required_by: &str) -> Result<&[FieldValue]> {
        self.column(name).ok_or_else(|| Error::MissingColumn {
            column: name.to_string(),
            required_by: required_by.to_string(),
        })
    }
}
