// src/stratify/stratifier.rs
//
// Per-step population stratifier.
//
// Ordering contract: `prepare_step` must run (and cache its assignment) before
// any same-step consumer calls `assignment`. Reads for a step that has not been
// prepared fail with `StratificationNotReady` instead of returning stale keys.
// Derived sources are evaluated at most once per step.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::config::stratum_key;
use crate::error::{Error, Result};
use crate::population::{FieldValue, IndividualId, PopulationSnapshot};

use super::registry::{OverlapPolicy, Source, StratificationRegistry};

/// Cached result of one step's stratification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StratumAssignment {
    step: u64,
    keys: BTreeMap<IndividualId, String>,
}

impl StratumAssignment {
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn get(&self, id: IndividualId) -> Option<&str> {
        self.keys.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &BTreeMap<IndividualId, String> {
        &self.keys
    }

    /// Number of individuals per stratum key.
    pub fn counts(&self) -> BTreeMap<&str, usize> {
        let mut out = BTreeMap::new();
        for key in self.keys.values() {
            *out.entry(key.as_str()).or_insert(0) += 1;
        }
        out
    }
}

pub struct PopulationStratifier {
    registry: StratificationRegistry,
    current_step: Option<u64>,
    cached: Option<StratumAssignment>,
    /// Derived values memoised for `current_step` and the population in
    /// `derived_ids`.
    derived_cache: HashMap<String, Vec<FieldValue>>,
    derived_ids: Vec<IndividualId>,
    derived_evaluations: u64,
}

impl PopulationStratifier {
    pub fn new(registry: StratificationRegistry) -> Self {
        Self {
            registry,
            current_step: None,
            cached: None,
            derived_cache: HashMap::new(),
            derived_ids: Vec::new(),
            derived_evaluations: 0,
        }
    }

    pub fn registry(&self) -> &StratificationRegistry {
        &self.registry
    }

    /// Step-boundary hook: invalidate the previous step, stratify `snapshot`
    /// and cache the result for `step`.
    ///
    /// Derived sources are memoised per (step, population); a different
    /// population within the same step is evaluated afresh.
    pub fn prepare_step(
        &mut self,
        step: u64,
        snapshot: &PopulationSnapshot,
    ) -> Result<&StratumAssignment> {
        if self.current_step != Some(step) || self.derived_ids.as_slice() != snapshot.ids() {
            self.derived_cache.clear();
            self.derived_ids = snapshot.ids().to_vec();
            self.cached = None;
            self.current_step = Some(step);
        }

        self.derived_evaluations +=
            evaluate_derived(&self.registry, snapshot, &mut self.derived_cache)?;
        let keys = self.stratify(snapshot, &self.derived_cache)?;
        debug!(step, individuals = keys.len(), "stratification cached");
        Ok(self.cached.insert(StratumAssignment { step, keys }))
    }

    /// Cached assignment for `step`.
    pub fn assignment(&self, step: u64) -> Result<&StratumAssignment> {
        self.cached
            .as_ref()
            .filter(|a| a.step == step)
            .ok_or(Error::StratificationNotReady { step })
    }

    /// Values of a derived source computed this step, if it has been evaluated.
    pub fn derived_values(&self, name: &str) -> Option<&[FieldValue]> {
        self.derived_cache.get(name).map(Vec::as_slice)
    }

    /// How many times any derived source has been computed.
    pub fn derived_evaluations(&self) -> u64 {
        self.derived_evaluations
    }

    /// Map every individual in `snapshot` to exactly one stratum key.
    ///
    /// Stand-alone call: derived sources are computed for this snapshot and
    /// the step cache is left untouched.
    pub fn assign(
        &mut self,
        snapshot: &PopulationSnapshot,
    ) -> Result<BTreeMap<IndividualId, String>> {
        let mut derived = HashMap::new();
        self.derived_evaluations += evaluate_derived(&self.registry, snapshot, &mut derived)?;
        self.stratify(snapshot, &derived)
    }

    fn stratify(
        &self,
        snapshot: &PopulationSnapshot,
        derived: &HashMap<String, Vec<FieldValue>>,
    ) -> Result<BTreeMap<IndividualId, String>> {
        let mut seen = HashSet::with_capacity(snapshot.len());
        if let Some(dup) = snapshot.ids().iter().find(|id| !seen.insert(**id)) {
            return Err(Error::config(format!(
                "individual {dup} appears more than once in the population snapshot"
            )));
        }
        if snapshot.is_empty() {
            return Ok(BTreeMap::new());
        }

        let dimensions = self.registry.dimensions();
        let mut winners: Vec<Vec<usize>> = vec![Vec::with_capacity(dimensions.len()); snapshot.len()];

        for dim in dimensions {
            let required_by = format!("stratification dimension '{}'", dim.name);
            let values: &[FieldValue] = match &dim.source {
                Source::Column(name) => snapshot.require(name, &required_by)?,
                Source::Derived(name) => derived.get(name).map(Vec::as_slice).ok_or_else(|| {
                    Error::MissingColumn {
                        column: name.clone(),
                        required_by: required_by.clone(),
                    }
                })?,
            };
            if values.len() != snapshot.len() {
                return Err(Error::ColumnLength {
                    column: dim.source.name().to_string(),
                    expected: snapshot.len(),
                    found: values.len(),
                });
            }

            for (row, value) in values.iter().enumerate() {
                let mut winner: Option<usize> = None;
                for (ci, category) in dim.categories.iter().enumerate() {
                    if !category.predicate.matches(value) {
                        continue;
                    }
                    match (self.registry.overlap_policy(), winner) {
                        (_, None) | (OverlapPolicy::LastMatchWins, Some(_)) => winner = Some(ci),
                        (OverlapPolicy::FirstMatchWins, Some(_)) => {}
                        (OverlapPolicy::Reject, Some(prev)) => {
                            return Err(Error::config(format!(
                                "individual {} matches both '{}' and '{}' in dimension '{}'",
                                snapshot.ids()[row],
                                dim.categories[prev].label,
                                category.label,
                                dim.name
                            )));
                        }
                    }
                }
                let ci = winner.ok_or_else(|| {
                    Error::config(format!(
                        "individual {} (value {value}) matches no category of dimension '{}'",
                        snapshot.ids()[row],
                        dim.name
                    ))
                })?;
                winners[row].push(ci);
            }
        }

        let keys = snapshot
            .ids()
            .iter()
            .zip(winners)
            .map(|(id, picks)| {
                let key = stratum_key(
                    dimensions
                        .iter()
                        .zip(picks)
                        .map(|(dim, ci)| (dim.name.as_str(), dim.categories[ci].label.as_str())),
                );
                (*id, key)
            })
            .collect();
        Ok(keys)
    }

    /// Every declared stratum with the members of `ids` assigned to it, in
    /// cartesian declaration order. Strata without members are still yielded.
    /// Ids missing from the assignment are skipped.
    pub fn groups(
        &self,
        assignment: &StratumAssignment,
        ids: &[IndividualId],
    ) -> Vec<(String, Vec<IndividualId>)> {
        let mut buckets: BTreeMap<&str, Vec<IndividualId>> = BTreeMap::new();
        for id in ids {
            if let Some(key) = assignment.get(*id) {
                buckets.entry(key).or_default().push(*id);
            }
        }
        self.registry
            .stratum_keys()
            .into_iter()
            .map(|key| {
                let members = buckets.remove(key.as_str()).unwrap_or_default();
                (key, members)
            })
            .collect()
    }
}

/// Compute every derived source of `registry` missing from `cache`. Returns
/// how many were evaluated.
fn evaluate_derived(
    registry: &StratificationRegistry,
    snapshot: &PopulationSnapshot,
    cache: &mut HashMap<String, Vec<FieldValue>>,
) -> Result<u64> {
    if snapshot.is_empty() {
        return Ok(0);
    }
    let mut evaluated = 0;
    for dim in registry.dimensions() {
        let Source::Derived(name) = &dim.source else {
            continue;
        };
        if cache.contains_key(name) {
            continue;
        }
        let compute = registry.derived(name).ok_or_else(|| Error::MissingColumn {
            column: name.clone(),
            required_by: format!("stratification dimension '{}'", dim.name),
        })?;
        let values = compute(snapshot)?;
        if values.len() != snapshot.len() {
            return Err(Error::ColumnLength {
                column: name.clone(),
                expected: snapshot.len(),
                found: values.len(),
            });
        }
        evaluated += 1;
        cache.insert(name.clone(), values);
    }
    Ok(evaluated)
}
