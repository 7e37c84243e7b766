// src/pipeline.rs
//
// Offline results pipeline: Load -> Filter -> Aggregate -> Reshape.
//
// Output bundle written by `MeasureData::dump`:
// - one `<measure>.json` and/or `<measure>.msgpack` long table per measure
// - `results_manifest.json` with a SHA256 per written table

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::aggregate::{aggregate, AggregateOptions, WideTable};
use crate::collect::{filter_complete, keyspace_path, Keyspace, RunCollector, SkippedRun};
use crate::config::ResultsConfig;
use crate::error::{Error, Result};
use crate::reshape::{reshape, LongTable};
use crate::schema::{ColumnSchema, Measure};

/// Crate version recorded in the manifest.
const STRATA_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const MANIFEST_FILE: &str = "results_manifest.json";

/// Which table encodings to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    MessagePack,
    Both,
}

impl OutputFormat {
    fn json(&self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::Both)
    }

    fn msgpack(&self) -> bool {
        matches!(self, OutputFormat::MessagePack | OutputFormat::Both)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Treat the input as one non-parallel run (draw 0, seed 0, baseline).
    pub single_run: bool,
    pub disaggregate_seeds: bool,
    /// Directory excluded from run discovery (usually the output directory).
    pub exclude: Option<PathBuf>,
}

/// Manifest entry for one written table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub measure: String,
    pub path: String,
    pub rows: usize,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsManifest {
    pub strata_version: String,
    pub disaggregated_seeds: bool,
    /// Sorted by path.
    pub tables: Vec<TableEntry>,
}

/// One long table per declared measure, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct MeasureData {
    tables: IndexMap<Measure, LongTable>,
    disaggregated: bool,
}

impl MeasureData {
    /// Reshape every declared measure out of `wide`.
    pub fn from_wide(wide: &WideTable, schema: &ColumnSchema, config: &ResultsConfig) -> Result<Self> {
        let mut tables = IndexMap::new();
        for measure in schema.measures() {
            tables.insert(measure, reshape(wide, schema, config, measure)?);
        }
        Ok(Self {
            tables,
            disaggregated: wide.is_disaggregated(),
        })
    }

    pub fn get(&self, measure: Measure) -> Option<&LongTable> {
        self.tables.get(&measure)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&Measure, &LongTable)> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Total long rows across all tables.
    pub fn total_rows(&self) -> usize {
        self.tables.values().map(LongTable::len).sum()
    }

    /// Write every table plus the manifest into `dir`.
    pub fn dump(&self, dir: &Path, format: OutputFormat) -> Result<ResultsManifest> {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        let mut entries = Vec::new();
        for (measure, table) in &self.tables {
            if format.json() {
                let bytes = serde_json::to_vec_pretty(&table.rows)
                    .map_err(|e| serialize_error(*measure, e))?;
                entries.push(write_table(dir, *measure, "json", &bytes, table.len())?);
            }
            if format.msgpack() {
                let bytes = rmp_serde::to_vec_named(&table.rows)
                    .map_err(|e| serialize_error(*measure, e))?;
                entries.push(write_table(dir, *measure, "msgpack", &bytes, table.len())?);
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let manifest = ResultsManifest {
            strata_version: STRATA_VERSION.to_string(),
            disaggregated_seeds: self.disaggregated,
            tables: entries,
        };
        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(&manifest).map_err(|e| Error::Serialize {
            what: MANIFEST_FILE.to_string(),
            reason: e.to_string(),
        })?;
        fs::write(&path, json).map_err(|e| Error::io(&path, e))?;

        info!(
            dir = %dir.display(),
            tables = manifest.tables.len(),
            "wrote measure tables"
        );
        Ok(manifest)
    }
}

fn serialize_error(measure: Measure, e: impl std::fmt::Display) -> Error {
    Error::Serialize {
        what: format!("table '{measure}'"),
        reason: e.to_string(),
    }
}

fn write_table(
    dir: &Path,
    measure: Measure,
    extension: &str,
    bytes: &[u8],
    rows: usize,
) -> Result<TableEntry> {
    let name = format!("{}.{extension}", measure.as_str());
    let path = dir.join(&name);
    fs::write(&path, bytes).map_err(|e| Error::io(&path, e))?;
    Ok(TableEntry {
        measure: measure.as_str().to_string(),
        path: name,
        rows,
        sha256: sha256_hex(bytes),
    })
}

/// Hex-encoded SHA256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Counts from each pipeline stage.
#[derive(Debug, Clone, Default)]
pub struct ProcessSummary {
    pub files: usize,
    pub loaded: usize,
    pub skipped: Vec<SkippedRun>,
    pub kept: usize,
    pub groups: usize,
    pub excluded_columns: Vec<String>,
}

/// Run the whole offline pipeline on `run_path` (a run file or a directory of
/// run files).
pub fn process_results(
    run_path: &Path,
    config: &ResultsConfig,
    options: &ProcessOptions,
) -> Result<(MeasureData, ProcessSummary)> {
    let schema = ColumnSchema::new(config)?;

    // Load
    let keyspace = if options.single_run {
        Keyspace::single_run(&config.baseline_scenario)
    } else {
        Keyspace::from_yaml_file(keyspace_path(run_path))?
    };
    let mut collector = if options.single_run {
        RunCollector::single_run(&config.baseline_scenario)
    } else {
        RunCollector::new()
    };
    if let Some(exclude) = &options.exclude {
        collector = collector.exclude(exclude);
    }

    let mut summary = ProcessSummary::default();
    let records = if run_path.is_dir() {
        let collected = collector.collect_dir(run_path)?;
        summary.files = collected.files;
        summary.skipped = collected.skipped;
        collected.records
    } else {
        summary.files = 1;
        collector.load(run_path)?
    };
    summary.loaded = records.len();

    // Filter
    let records = filter_complete(records, &keyspace);
    summary.kept = records.len();

    // Aggregate
    let agg = AggregateOptions::new(options.disaggregate_seeds, schema.non_count_columns(config));
    let wide = aggregate(&records, &agg);
    summary.groups = wide.len();
    summary.excluded_columns = wide.excluded().to_vec();

    // Reshape
    let data = MeasureData::from_wide(&wide, &schema, config)?;
    info!(
        measures = data.len(),
        rows = data.total_rows(),
        "processed results"
    );
    Ok((data, summary))
}
