// src/observer.rs
//
// Observers turn a step's population snapshot into recorder amounts.
//
// An observer never stratifies on its own: it reads the stratum of each
// individual from the assignment the stratifier cached for the same step.

use tracing::trace;

use crate::error::{Error, Result};
use crate::population::{FieldValue, PopulationSnapshot};
use crate::recorder::MetricRecorder;
use crate::schema::Measure;
use crate::stratify::{Predicate, StratumAssignment};

/// Everything an observer may read during one step.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub step: u64,
    /// Step length in years, used for person-time weights.
    pub step_size: f64,
    pub snapshot: &'a PopulationSnapshot,
    pub strata: &'a StratumAssignment,
}

pub trait Observer {
    fn name(&self) -> &str;

    fn observe(&mut self, ctx: &StepContext<'_>, recorder: &mut MetricRecorder) -> Result<()>;
}

/// Which recorder column family the observer writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Measure(Measure),
    /// Unstratified standard column, e.g. `years_of_life_lost`.
    Standard(String),
}

/// Where a template field takes its value from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Column(String),
    Fixed(String),
}

/// Amount added per matching row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Weight {
    One,
    StepSize,
    Column(String),
}

/// Counts (or sums) matching rows into a measure's columns.
#[derive(Debug, Clone)]
pub struct CountingObserver {
    name: String,
    target: Target,
    bindings: Vec<(String, Binding)>,
    filters: Vec<(String, Predicate)>,
    weight: Weight,
}

impl CountingObserver {
    pub fn new(name: &str, target: Target) -> Self {
        Self {
            name: name.to_string(),
            target,
            bindings: Vec::new(),
            filters: Vec::new(),
            weight: Weight::One,
        }
    }

    /// Bind a template field to a snapshot column.
    pub fn bind(mut self, field: &str, column: &str) -> Self {
        self.bindings
            .push((field.to_string(), Binding::Column(column.to_string())));
        self
    }

    /// Bind a template field to a constant label.
    pub fn bind_fixed(mut self, field: &str, value: &str) -> Self {
        self.bindings
            .push((field.to_string(), Binding::Fixed(value.to_string())));
        self
    }

    /// Only rows whose `column` value satisfies `predicate` are counted.
    pub fn filter(mut self, column: &str, predicate: Predicate) -> Self {
        self.filters.push((column.to_string(), predicate));
        self
    }

    pub fn weight(mut self, weight: Weight) -> Self {
        self.weight = weight;
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    fn required_by(&self) -> String {
        format!("observer '{}'", self.name)
    }
}

impl Observer for CountingObserver {
    fn name(&self) -> &str {
        &self.name
    }

    fn observe(&mut self, ctx: &StepContext<'_>, recorder: &mut MetricRecorder) -> Result<()> {
        let snapshot = ctx.snapshot;
        if snapshot.is_empty() {
            return Ok(());
        }
        let required_by = self.required_by();

        let filters = self
            .filters
            .iter()
            .map(|(column, predicate)| -> Result<_> {
                Ok((snapshot.require(column, &required_by)?, predicate))
            })
            .collect::<Result<Vec<_>>>()?;

        enum Resolved<'s> {
            Column(&'s [FieldValue]),
            Fixed(&'s str),
        }
        let bindings = self
            .bindings
            .iter()
            .map(|(field, binding)| -> Result<_> {
                let resolved = match binding {
                    Binding::Column(column) => {
                        Resolved::Column(snapshot.require(column, &required_by)?)
                    }
                    Binding::Fixed(value) => Resolved::Fixed(value.as_str()),
                };
                Ok((field.as_str(), resolved))
            })
            .collect::<Result<Vec<_>>>()?;

        let weights = match &self.weight {
            Weight::Column(column) => Some((column, snapshot.require(column, &required_by)?)),
            Weight::One | Weight::StepSize => None,
        };

        let mut counted = 0usize;
        for (row, id) in snapshot.ids().iter().enumerate() {
            if !filters.iter().all(|(values, p)| p.matches(&values[row])) {
                continue;
            }

            let stratum = ctx
                .strata
                .get(*id)
                .ok_or(Error::StratificationNotReady { step: ctx.step })?;

            let amount = match &weights {
                Some((column, values)) => values[row].as_f64().ok_or_else(|| {
                    Error::config(format!(
                        "weight column '{column}' holds non-numeric value '{}' for individual {id}",
                        values[row]
                    ))
                })?,
                None if self.weight == Weight::StepSize => ctx.step_size,
                None => 1.0,
            };

            match &self.target {
                Target::Measure(measure) => {
                    let fields: Vec<(&str, String)> = bindings
                        .iter()
                        .map(|(field, resolved)| {
                            let label = match resolved {
                                Resolved::Column(values) => values[row].label(),
                                Resolved::Fixed(v) => (*v).to_string(),
                            };
                            (*field, label)
                        })
                        .collect();
                    recorder.record(*measure, &fields, stratum, amount)?;
                }
                Target::Standard(column) => recorder.record_standard(column, amount)?,
            }
            counted += 1;
        }

        trace!(observer = %self.name, step = ctx.step, rows = counted, "observed");
        Ok(())
    }
}
