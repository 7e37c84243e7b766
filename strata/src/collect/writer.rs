// src/collect/writer.rs
//
// Persist one run's metrics as a run file the collector can read back.
// Identity columns are written under the raw simulation output names.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::error::{Error, Result};

use super::{
    RunFormat, RunIdentity, OUTPUT_INPUT_DRAW_COLUMN, OUTPUT_RANDOM_SEED_COLUMN,
    OUTPUT_SCENARIO_COLUMN,
};

#[derive(Debug, Clone, Copy)]
pub struct RunWriter {
    format: RunFormat,
}

impl RunWriter {
    pub fn new(format: RunFormat) -> Self {
        Self { format }
    }

    /// File name used for a run: `draw_{d}_seed_{s}_{scenario}.{ext}`.
    pub fn file_name(&self, identity: &RunIdentity) -> String {
        format!(
            "draw_{}_seed_{}_{}.{}",
            identity.input_draw,
            identity.random_seed,
            identity.scenario,
            self.format.extension()
        )
    }

    /// Write `metrics` for `identity` into `dir`, returning the file path.
    pub fn write(
        &self,
        dir: &Path,
        identity: &RunIdentity,
        metrics: &BTreeMap<String, f64>,
    ) -> Result<PathBuf> {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        let mut row = Map::new();
        row.insert(OUTPUT_INPUT_DRAW_COLUMN.into(), identity.input_draw.into());
        row.insert(OUTPUT_RANDOM_SEED_COLUMN.into(), identity.random_seed.into());
        row.insert(
            OUTPUT_SCENARIO_COLUMN.into(),
            Value::String(identity.scenario.clone()),
        );
        for (column, value) in metrics {
            let number = Number::from_f64(*value).ok_or_else(|| Error::Serialize {
                what: format!("column '{column}'"),
                reason: format!("{value} is not a finite number"),
            })?;
            row.insert(column.clone(), Value::Number(number));
        }
        let row = Value::Object(row);

        let bytes = match self.format {
            RunFormat::Json => serde_json::to_vec(&row).map_err(|e| Error::Serialize {
                what: "run file".to_string(),
                reason: e.to_string(),
            })?,
            RunFormat::MessagePack => rmp_serde::to_vec(&row).map_err(|e| Error::Serialize {
                what: "run file".to_string(),
                reason: e.to_string(),
            })?,
        };

        let path = dir.join(self.file_name(identity));
        fs::write(&path, bytes).map_err(|e| Error::io(&path, e))?;
        debug!(path = %path.display(), columns = metrics.len(), "wrote run file");
        Ok(path)
    }
}
