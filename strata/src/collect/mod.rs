// src/collect/mod.rs
//
// Run collection: discover run files, load each into identity-tagged records,
// and describe the keyspace the runs were launched from.
//
// Run file layout: one JSON (`.json`) or MessagePack (`.msgpack`) document per
// file holding either a single row map or an array of row maps. Identity
// columns may use the raw simulation output names or the short names.

pub mod filter;
pub mod writer;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models;

pub use filter::filter_complete;
pub use writer::RunWriter;

pub const INPUT_DRAW_COLUMN: &str = "input_draw";
pub const RANDOM_SEED_COLUMN: &str = "random_seed";
pub const SCENARIO_COLUMN: &str = "scenario";

pub const OUTPUT_INPUT_DRAW_COLUMN: &str = "input_data.input_draw_number";
pub const OUTPUT_RANDOM_SEED_COLUMN: &str = "randomness.random_seed";
pub const OUTPUT_SCENARIO_COLUMN: &str = "placeholder_branch_name.scenario";

/// Keyspace descriptor expected next to the run files.
pub const KEYSPACE_FILE: &str = "keyspace.yaml";

/// Run file container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunFormat {
    Json,
    MessagePack,
}

impl RunFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(RunFormat::Json),
            "msgpack" | "mpk" => Some(RunFormat::MessagePack),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            RunFormat::Json => "json",
            RunFormat::MessagePack => "msgpack",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunIdentity {
    pub input_draw: u64,
    pub random_seed: u64,
    pub scenario: String,
}

impl RunIdentity {
    pub fn new(input_draw: u64, random_seed: u64, scenario: &str) -> Self {
        Self {
            input_draw,
            random_seed,
            scenario: scenario.to_string(),
        }
    }
}

/// One run's wide output row.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub identity: RunIdentity,
    pub values: BTreeMap<String, f64>,
}

impl RunRecord {
    pub fn new(identity: RunIdentity, values: BTreeMap<String, f64>) -> Self {
        Self { identity, values }
    }
}

/// Declared launch grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyspace {
    #[serde(alias = "input_data.input_draw_number")]
    pub input_draw: Vec<u64>,
    #[serde(alias = "randomness.random_seed")]
    pub random_seed: Vec<u64>,
    #[serde(alias = "placeholder_branch_name.scenario")]
    pub scenario: Vec<String>,
}

impl Keyspace {
    pub fn declare(draws: Vec<u64>, seeds: Vec<u64>, scenarios: Vec<String>) -> Result<Self> {
        let ks = Self {
            input_draw: draws,
            random_seed: seeds,
            scenario: scenarios,
        };
        ks.validate()?;
        Ok(ks)
    }

    /// Keyspace of a single, non-parallel run.
    pub fn single_run(baseline_scenario: &str) -> Self {
        Self {
            input_draw: vec![0],
            random_seed: vec![0],
            scenario: vec![baseline_scenario.to_string()],
        }
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::IncompleteKeyspace(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let ks: Keyspace = serde_yaml::from_str(yaml)
            .map_err(|e| Error::IncompleteKeyspace(format!("malformed keyspace: {e}")))?;
        ks.validate()?;
        Ok(ks)
    }

    pub fn write_yaml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).map_err(|e| Error::Serialize {
            what: "keyspace".to_string(),
            reason: e.to_string(),
        })?;
        fs::write(path, yaml).map_err(|e| Error::io(path, e))
    }

    fn validate(&self) -> Result<()> {
        for (axis, empty) in [
            (INPUT_DRAW_COLUMN, self.input_draw.is_empty()),
            (RANDOM_SEED_COLUMN, self.random_seed.is_empty()),
            (SCENARIO_COLUMN, self.scenario.is_empty()),
        ] {
            if empty {
                return Err(Error::IncompleteKeyspace(format!("'{axis}' has no values")));
            }
        }
        Ok(())
    }

    pub fn contains(&self, identity: &RunIdentity) -> bool {
        self.input_draw.contains(&identity.input_draw)
            && self.random_seed.contains(&identity.random_seed)
            && self.scenario.contains(&identity.scenario)
    }
}

/// A run file the collector could not use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRun {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of collecting a directory.
#[derive(Debug, Clone, Default)]
pub struct Collected {
    pub records: Vec<RunRecord>,
    pub skipped: Vec<SkippedRun>,
    pub files: usize,
}

#[derive(Debug, Clone)]
pub struct RunCollector {
    /// Identity stamped on every record in single-run mode.
    stamp: Option<RunIdentity>,
    throwaway: HashSet<String>,
    exclude: Vec<PathBuf>,
}

impl Default for RunCollector {
    fn default() -> Self {
        Self {
            stamp: None,
            throwaway: models::throwaway_columns().into_iter().collect(),
            exclude: Vec::new(),
        }
    }
}

impl RunCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-run mode: identity columns are ignored and every record gets
    /// draw 0, seed 0 and the baseline scenario.
    pub fn single_run(baseline_scenario: &str) -> Self {
        Self {
            stamp: Some(RunIdentity::new(0, 0, baseline_scenario)),
            ..Self::default()
        }
    }

    /// Skip everything under `path` during discovery.
    pub fn exclude(mut self, path: impl Into<PathBuf>) -> Self {
        self.exclude.push(path.into());
        self
    }

    pub fn is_single_run(&self) -> bool {
        self.stamp.is_some()
    }

    /// Load every record of one run file.
    pub fn load(&self, path: &Path) -> Result<Vec<RunRecord>> {
        let format = RunFormat::from_path(path)
            .ok_or_else(|| Error::corrupt(path, "unrecognised run file extension"))?;
        let bytes = fs::read(path).map_err(|e| Error::corrupt(path, e.to_string()))?;

        let doc: Value = match format {
            RunFormat::Json => serde_json::from_slice(&bytes)
                .map_err(|e| Error::corrupt(path, format!("invalid JSON: {e}")))?,
            RunFormat::MessagePack => rmp_serde::from_slice(&bytes)
                .map_err(|e| Error::corrupt(path, format!("invalid MessagePack: {e}")))?,
        };

        let rows = match doc {
            Value::Object(row) => vec![row],
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(row) => Ok(row),
                    other => Err(Error::corrupt(
                        path,
                        format!("expected a row map, found {}", kind(&other)),
                    )),
                })
                .collect::<Result<Vec<_>>>()?,
            other => {
                return Err(Error::corrupt(
                    path,
                    format!("expected a row map or an array of rows, found {}", kind(&other)),
                ))
            }
        };

        rows.into_iter()
            .map(|row| self.parse_row(path, row))
            .collect()
    }

    fn parse_row(&self, path: &Path, row: Map<String, Value>) -> Result<RunRecord> {
        let identity = match &self.stamp {
            Some(stamp) => stamp.clone(),
            None => RunIdentity {
                input_draw: integer(path, &row, INPUT_DRAW_COLUMN, OUTPUT_INPUT_DRAW_COLUMN)?,
                random_seed: integer(path, &row, RANDOM_SEED_COLUMN, OUTPUT_RANDOM_SEED_COLUMN)?,
                scenario: lookup(&row, SCENARIO_COLUMN, OUTPUT_SCENARIO_COLUMN)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| Error::corrupt(path, "missing scenario identity column"))?,
            },
        };

        let mut values = BTreeMap::new();
        for (column, value) in row {
            if is_identity(&column) || self.throwaway.contains(&column) {
                continue;
            }
            let v = value.as_f64().ok_or_else(|| {
                Error::corrupt(
                    path,
                    format!("column '{column}' holds {} instead of a number", kind(&value)),
                )
            })?;
            values.insert(column, v);
        }
        Ok(RunRecord { identity, values })
    }

    /// Load every run file under `dir`. Corrupt files and duplicate
    /// identities are logged and skipped; an unreadable root is an error.
    pub fn collect_dir(&self, dir: &Path) -> Result<Collected> {
        if !dir.is_dir() {
            return Err(Error::io(
                dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "run directory not found"),
            ));
        }
        let files = self.discover(dir)?;
        let mut out = Collected {
            files: files.len(),
            ..Collected::default()
        };
        let mut seen: HashSet<RunIdentity> = HashSet::new();

        for path in files {
            match self.load(&path) {
                Ok(records) => {
                    for record in records {
                        if !self.is_single_run() && !seen.insert(record.identity.clone()) {
                            let err = Error::corrupt(
                                &path,
                                format!("duplicate run identity {:?}", record.identity),
                            );
                            warn!(error = %err, "skipping duplicate run record");
                            out.skipped.push(SkippedRun {
                                path: path.clone(),
                                reason: err.to_string(),
                            });
                            continue;
                        }
                        out.records.push(record);
                    }
                }
                Err(err) if !err.is_structural() => {
                    warn!(error = %err, "skipping run file");
                    out.skipped.push(SkippedRun {
                        path,
                        reason: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            files = out.files,
            records = out.records.len(),
            skipped = out.skipped.len(),
            "collected run outputs"
        );
        Ok(out)
    }

    /// Recursively find run files under `dir`, sorted by path.
    pub fn discover(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        self.discover_recursive(dir, &mut found)?;
        found.sort();
        debug!(dir = %dir.display(), files = found.len(), "discovered run files");
        Ok(found)
    }

    fn discover_recursive(&self, dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
        if self.exclude.iter().any(|e| e == dir) {
            return Ok(());
        }
        let entries = fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| Error::io(dir, e))?.path();
            if path.is_dir() {
                self.discover_recursive(&path, found)?;
            } else if RunFormat::from_path(&path).is_some() {
                found.push(path);
            }
        }
        Ok(())
    }
}

/// Keyspace location for a run path (a run file or a run directory).
pub fn keyspace_path(run_path: &Path) -> PathBuf {
    if run_path.is_dir() {
        run_path.join(KEYSPACE_FILE)
    } else {
        run_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(KEYSPACE_FILE)
    }
}

/// Distinct identities present in `records`.
pub fn identities(records: &[RunRecord]) -> BTreeSet<&RunIdentity> {
    records.iter().map(|r| &r.identity).collect()
}

fn is_identity(column: &str) -> bool {
    matches!(
        column,
        INPUT_DRAW_COLUMN
            | RANDOM_SEED_COLUMN
            | SCENARIO_COLUMN
            | OUTPUT_INPUT_DRAW_COLUMN
            | OUTPUT_RANDOM_SEED_COLUMN
            | OUTPUT_SCENARIO_COLUMN
    )
}

fn lookup<'a>(row: &'a Map<String, Value>, short: &str, raw: &str) -> Option<&'a Value> {
    row.get(short).or_else(|| row.get(raw))
}

fn integer(path: &Path, row: &Map<String, Value>, short: &str, raw: &str) -> Result<u64> {
    let value = lookup(row, short, raw)
        .ok_or_else(|| Error::corrupt(path, format!("missing '{short}' identity column")))?;
    if let Some(i) = value.as_u64() {
        return Ok(i);
    }
    match value.as_f64() {
        Some(f) if f >= 0.0 && f.fract() == 0.0 => Ok(f as u64),
        _ => Err(Error::corrupt(
            path,
            format!("identity column '{short}' is not a non-negative integer"),
        )),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a map",
    }
}
