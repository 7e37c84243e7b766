// src/schema/mod.rs
//
// Column schema: measure -> ordered column names, and the inverse parse.
//
// This is the vocabulary contract between the runtime recorder (which writes
// columns through `encode`) and the offline reshaper (which reads them back
// through `parse`). The `STRATUM` field domain is derived from the configured
// stratification; if the runtime registry is declared with different labels
// the offline join misses rows. `StratificationRegistry::check_vocabulary`
// exists to catch that early.

pub mod codec;
pub mod measure;

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::config::ResultsConfig;
use crate::error::{Error, Result};

pub use codec::{ColumnCodec, ColumnTemplate, FieldDomains, FieldValues};
pub use measure::{Measure, MeasureGroup, STRATUM_FIELD};

/// One row of a results map: the column and the fields that generated it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsMapEntry {
    pub key: String,
    pub measure: Measure,
    pub fields: FieldValues,
}

#[derive(Debug, Clone)]
pub struct ColumnSchema {
    codecs: IndexMap<Measure, ColumnCodec>,
    standard_columns: Vec<String>,
    owner: HashMap<String, Measure>,
}

impl ColumnSchema {
    /// Build every declared measure's codec from the configuration.
    ///
    /// Without stratification dimensions the `STRATUM` segment is dropped from
    /// every template, so columns carry no trailing separator.
    pub fn new(config: &ResultsConfig) -> Result<Self> {
        let domains = config.field_domains();
        let templates = config
            .templates
            .iter()
            .map(|(m, t)| -> Result<(Measure, String)> {
                if config.stratification.is_empty() {
                    let stripped = ColumnTemplate::parse(t)?.without_field(STRATUM_FIELD);
                    Ok((*m, stripped.as_str().to_string()))
                } else {
                    Ok((*m, t.clone()))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_templates(
            templates.iter().map(|(m, t)| (*m, t.as_str())),
            &domains,
            config.standard_columns.clone(),
        )
    }

    /// Build from explicit templates and domains.
    pub fn from_templates<'a>(
        templates: impl IntoIterator<Item = (Measure, &'a str)>,
        domains: &FieldDomains,
        standard_columns: Vec<String>,
    ) -> Result<Self> {
        let mut codecs = IndexMap::new();
        let mut owner = HashMap::new();

        for (measure, template) in templates {
            if codecs.contains_key(&measure) {
                return Err(Error::config(format!("measure '{measure}' declared twice")));
            }
            let codec = ColumnCodec::new(template, domains)?;
            for column in codec.columns() {
                if let Some(other) = owner.insert(column.clone(), measure) {
                    return Err(Error::config(format!(
                        "column '{column}' is produced by both '{other}' and '{measure}'"
                    )));
                }
            }
            codecs.insert(measure, codec);
        }

        for column in &standard_columns {
            if let Some(m) = owner.get(column) {
                return Err(Error::config(format!(
                    "standard column '{column}' collides with measure '{m}'"
                )));
            }
        }

        Ok(Self {
            codecs,
            standard_columns,
            owner,
        })
    }

    pub fn codec(&self, measure: Measure) -> Result<&ColumnCodec> {
        self.codecs
            .get(&measure)
            .ok_or_else(|| Error::UnknownMeasure(measure.as_str().to_string()))
    }

    /// Declared measures in declaration order.
    pub fn measures(&self) -> impl Iterator<Item = Measure> + '_ {
        self.codecs.keys().copied()
    }

    pub fn is_declared(&self, measure: Measure) -> bool {
        self.codecs.contains_key(&measure)
    }

    /// Every column of `measure`, in cartesian declaration order.
    pub fn columns_for(&self, measure: Measure) -> Result<&[String]> {
        Ok(self.codec(measure)?.columns())
    }

    /// Columns of a measure given by name (CLI entry point).
    pub fn columns_for_name(&self, measure: &str) -> Result<&[String]> {
        self.columns_for(measure.parse()?)
    }

    /// Recover the field values that generated `column`.
    pub fn parse(&self, column: &str, measure: Measure) -> Result<FieldValues> {
        self.codec(measure)?
            .decode(column)
            .ok_or_else(|| Error::UnknownColumn {
                column: column.to_string(),
                measure: measure.as_str().to_string(),
            })
    }

    /// Build the column for `measure` from field values.
    pub fn encode<K, V>(&self, measure: Measure, values: &[(K, V)]) -> Result<String>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let codec = self.codec(measure)?;
        codec.encode(values).ok_or_else(|| Error::UnknownColumn {
            column: describe(codec.template(), values),
            measure: measure.as_str().to_string(),
        })
    }

    /// Measure owning `column`, if any.
    pub fn measure_of(&self, column: &str) -> Option<Measure> {
        self.owner.get(column).copied()
    }

    pub fn standard_columns(&self) -> &[String] {
        &self.standard_columns
    }

    /// Standard columns, then every measure's columns in declaration order.
    pub fn all_columns(&self) -> Vec<String> {
        let mut out = self.standard_columns.clone();
        for codec in self.codecs.values() {
            out.extend(codec.columns().iter().cloned());
        }
        out
    }

    /// Column -> fields table for one measure, sorted by column name.
    pub fn results_map(&self, measure: Measure) -> Result<Vec<ResultsMapEntry>> {
        let codec = self.codec(measure)?;
        let mut entries: Vec<ResultsMapEntry> = codec
            .columns()
            .iter()
            .enumerate()
            .filter_map(|(i, key)| {
                codec.values_at(i).map(|fields| ResultsMapEntry {
                    key: key.clone(),
                    measure,
                    fields,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Columns of every measure flagged as non-count in `config`.
    pub fn non_count_columns(&self, config: &ResultsConfig) -> Vec<String> {
        let mut out = Vec::new();
        for measure in &config.non_count_measures {
            if let Some(codec) = self.codecs.get(measure) {
                out.extend(codec.columns().iter().cloned());
            }
        }
        out
    }
}

fn describe<K: AsRef<str>, V: AsRef<str>>(template: &str, values: &[(K, V)]) -> String {
    let parts: Vec<String> = values
        .iter()
        .map(|(k, v)| format!("{}={}", k.as_ref(), v.as_ref()))
        .collect();
    format!("{template} [{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DimensionSpec;

    fn small_config() -> ResultsConfig {
        let mut cfg = ResultsConfig::default();
        cfg.stratification = vec![DimensionSpec::new("sex", &["male", "female"])];
        cfg
    }

    #[test]
    fn default_schema_builds_and_is_collision_free() {
        let schema = ColumnSchema::new(&ResultsConfig::default()).unwrap();
        let all = schema.all_columns();
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), unique.len());
        assert_eq!(schema.columns_for(Measure::Population).unwrap().len(), 4);
        // 6 causes x 2 years x 2 sexes x 4 ages x 4 wasting categories
        assert_eq!(schema.columns_for(Measure::Deaths).unwrap().len(), 384);
    }

    #[test]
    fn default_death_column_matches_runtime_naming() {
        let schema = ColumnSchema::new(&ResultsConfig::default()).unwrap();
        let col = schema
            .encode(
                Measure::Deaths,
                &[
                    ("CAUSE_OF_DEATH", "measles"),
                    ("YEAR", "2022"),
                    ("SEX", "female"),
                    ("AGE_GROUP", "1_to_4"),
                    ("STRATUM", "wasting_state_cat2"),
                ],
            )
            .unwrap();
        assert_eq!(
            col,
            "death_due_to_measles_year_2022_sex_female_age_1_to_4_wasting_state_cat2"
        );
        assert_eq!(schema.measure_of(&col), Some(Measure::Deaths));
    }

    #[test]
    fn unstratified_columns_have_no_trailing_separator() {
        let mut cfg = ResultsConfig::default();
        cfg.stratification.clear();
        let schema = ColumnSchema::new(&cfg).unwrap();
        let deaths = schema.columns_for(Measure::Deaths).unwrap();
        assert_eq!(
            deaths[0],
            "death_due_to_other_causes_year_2022_sex_male_age_early_neonatal"
        );
        assert!(schema.all_columns().iter().all(|c| !c.ends_with('_')));
        assert!(!schema.codec(Measure::Deaths).unwrap().fields().iter().any(|f| f == STRATUM_FIELD));
    }

    #[test]
    fn parse_round_trips_every_default_column() {
        let schema = ColumnSchema::new(&small_config()).unwrap();
        for measure in schema.measures().collect::<Vec<_>>() {
            let codec = schema.codec(measure).unwrap();
            for (i, col) in codec.columns().iter().enumerate() {
                assert_eq!(
                    schema.parse(col, measure).unwrap(),
                    codec.values_at(i).unwrap()
                );
            }
        }
    }

    #[test]
    fn undeclared_measure_is_unknown_measure() {
        let mut cfg = small_config();
        cfg.templates.shift_remove(&Measure::Ylds);
        let schema = ColumnSchema::new(&cfg).unwrap();
        assert!(matches!(
            schema.columns_for(Measure::Ylds),
            Err(Error::UnknownMeasure(_))
        ));
        assert!(matches!(
            schema.columns_for_name("not_a_measure"),
            Err(Error::UnknownMeasure(_))
        ));
    }

    #[test]
    fn foreign_column_is_unknown_column() {
        let schema = ColumnSchema::new(&small_config()).unwrap();
        let err = schema
            .parse("total_population_living", Measure::Deaths)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownColumn { .. }));
    }

    #[test]
    fn results_map_is_sorted_and_tagged() {
        let schema = ColumnSchema::new(&small_config()).unwrap();
        let map = schema.results_map(Measure::Population).unwrap();
        let keys: Vec<_> = map.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "total_population_dead",
                "total_population_living",
                "total_population_tracked",
                "total_population_untracked"
            ]
        );
        assert!(map.iter().all(|e| e.measure == Measure::Population));
    }

    #[test]
    fn cross_measure_collision_is_rejected() {
        let mut domains = FieldDomains::new();
        domains.insert("X".into(), vec!["a".into()]);
        let err = ColumnSchema::from_templates(
            [(Measure::Deaths, "m_{X}"), (Measure::Ylls, "m_a")],
            &domains,
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
