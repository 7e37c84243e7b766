// src/config.rs
//
// Immutable results configuration.
//
// One `ResultsConfig` is built at process start (defaults, optional YAML file,
// then environment overrides) and passed by reference to every component that
// needs the value domains, stratification vocabulary or column templates.
//
// Environment overrides:
// - STRATA_YEARS:              comma-separated list replacing the YEAR domain
// - STRATA_BASELINE_SCENARIO:  scenario name used in single-run mode

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::{self, SisModel};
use crate::schema::codec::FieldDomains;
use crate::schema::measure::{Measure, STRATUM_FIELD};

/// Separator between stratum key parts.
pub const STRATUM_SEPARATOR: &str = "_";

/// Stratification vocabulary for one dimension (labels only; predicates are
/// registered at runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSpec {
    pub name: String,
    pub categories: Vec<String>,
}

impl DimensionSpec {
    pub fn new(name: &str, categories: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// Template field -> value domain, in declaration order.
    pub domains: FieldDomains,
    /// Stratification dimensions, in registration order.
    pub stratification: Vec<DimensionSpec>,
    /// Declared measures and their column templates.
    pub templates: IndexMap<Measure, String>,
    /// Unstratified columns reported alongside the measures.
    pub standard_columns: Vec<String>,
    /// Measures whose columns must not be summed across seeds.
    pub non_count_measures: Vec<Measure>,
    /// Scenario assigned to records in single-run mode.
    pub baseline_scenario: String,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Declared cause order; column enumeration follows it.
const DISABILITY_CAUSES: [SisModel; 5] = [
    models::DIARRHEA,
    models::MEASLES,
    models::LRI,
    models::MODERATE_PEM,
    models::SEVERE_PEM,
];

fn causes_of_disability() -> Vec<String> {
    DISABILITY_CAUSES
        .iter()
        .map(|m| m.state_name().to_string())
        .collect()
}

impl Default for ResultsConfig {
    fn default() -> Self {
        let mut domains = FieldDomains::new();
        domains.insert(
            "POP_STATE".into(),
            strings(&["living", "dead", "tracked", "untracked"]),
        );
        domains.insert("YEAR".into(), (2022..2024).map(|y| y.to_string()).collect());
        domains.insert("SEX".into(), strings(&["male", "female"]));
        domains.insert(
            "AGE_GROUP".into(),
            strings(&["early_neonatal", "late_neonatal", "post_neonatal", "1_to_4"]),
        );

        let mut causes_of_death = vec!["other_causes".to_string()];
        causes_of_death.extend(causes_of_disability());
        domains.insert("CAUSE_OF_DEATH".into(), causes_of_death);
        domains.insert("CAUSE_OF_DISABILITY".into(), causes_of_disability());

        let model_fields: [(&str, SisModel); 5] = [
            ("DIARRHEA", models::DIARRHEA),
            ("LRI", models::LRI),
            ("MEASLES", models::MEASLES),
            ("MODERATE_PEM", models::MODERATE_PEM),
            ("SEVERE_PEM", models::SEVERE_PEM),
        ];
        for (prefix, model) in model_fields {
            domains.insert(format!("{prefix}_STATE"), model.states());
        }
        for (prefix, model) in model_fields {
            domains.insert(format!("{prefix}_TRANSITION"), model.transition_names());
        }
        domains.insert(
            "CGF_RISK_STATE_NUMERIC".into(),
            strings(&["cat1", "cat2", "cat3", "cat4"]),
        );

        let templates = Measure::ALL
            .iter()
            .map(|m| (*m, m.default_template().to_string()))
            .collect();

        Self {
            domains,
            stratification: vec![DimensionSpec::new(
                "wasting_state",
                &["cat4", "cat3", "cat2", "cat1"],
            )],
            templates,
            standard_columns: strings(&[
                "total_population",
                "years_of_life_lost",
                "years_lived_with_disability",
            ]),
            non_count_measures: Vec::new(),
            baseline_scenario: "baseline".to_string(),
        }
    }
}

impl ResultsConfig {
    /// Load from a YAML file; missing keys fall back to the defaults.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: ResultsConfig = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("failed to parse results config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `STRATA_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(raw) = std::env::var("STRATA_YEARS") {
            let years: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if years.iter().all(|y| y.parse::<i32>().is_ok()) && !years.is_empty() {
                info!(years = %raw, "STRATA_YEARS overrode the YEAR domain");
                self.domains.insert("YEAR".to_string(), years);
            } else {
                warn!(value = %raw, "could not parse STRATA_YEARS; keeping configured years");
            }
        }
        if let Ok(raw) = std::env::var("STRATA_BASELINE_SCENARIO") {
            if raw.trim().is_empty() {
                warn!("STRATA_BASELINE_SCENARIO is empty; ignoring");
            } else {
                info!(scenario = %raw, "STRATA_BASELINE_SCENARIO overrode the baseline scenario");
                self.baseline_scenario = raw.trim().to_string();
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.domains.contains_key(STRATUM_FIELD) {
            return Err(Error::config(format!(
                "'{STRATUM_FIELD}' is derived from the stratification and cannot be declared as a domain"
            )));
        }
        for (field, values) in &self.domains {
            if values.is_empty() {
                return Err(Error::config(format!("field '{field}' has no values")));
            }
        }

        let mut seen = Vec::new();
        for dim in &self.stratification {
            if dim.name.is_empty() {
                return Err(Error::config("stratification dimension with empty name"));
            }
            if seen.contains(&dim.name) {
                return Err(Error::config(format!(
                    "stratification dimension '{}' declared twice",
                    dim.name
                )));
            }
            if dim.categories.is_empty() {
                return Err(Error::config(format!(
                    "stratification dimension '{}' has no categories",
                    dim.name
                )));
            }
            seen.push(dim.name.clone());
        }

        if self.baseline_scenario.is_empty() {
            return Err(Error::config("baseline_scenario cannot be empty"));
        }
        Ok(())
    }

    /// Every composite stratum key, in cartesian declaration order.
    ///
    /// With no dimensions there is exactly one stratum: the empty key.
    pub fn stratum_keys(&self) -> Vec<String> {
        self.stratum_tuples()
            .into_iter()
            .map(|tuple| stratum_key(tuple.iter().map(|(d, c)| (d.as_str(), c.as_str()))))
            .collect()
    }

    /// Split a stratum key back into `(dimension, category)` pairs.
    pub fn stratum_fields(&self, key: &str) -> Option<Vec<(String, String)>> {
        self.stratum_index().remove(key)
    }

    /// Stratum key -> `(dimension, category)` pairs, for every stratum.
    pub fn stratum_index(&self) -> HashMap<String, Vec<(String, String)>> {
        self.stratum_tuples()
            .into_iter()
            .map(|tuple| {
                let key = stratum_key(tuple.iter().map(|(d, c)| (d.as_str(), c.as_str())));
                (key, tuple)
            })
            .collect()
    }

    fn stratum_tuples(&self) -> Vec<Vec<(String, String)>> {
        let mut tuples: Vec<Vec<(String, String)>> = vec![Vec::new()];
        for dim in &self.stratification {
            let mut next = Vec::with_capacity(tuples.len() * dim.categories.len());
            for prefix in &tuples {
                for cat in &dim.categories {
                    let mut t = prefix.clone();
                    t.push((dim.name.clone(), cat.clone()));
                    next.push(t);
                }
            }
            tuples = next;
        }
        tuples
    }

    /// Domain table including the derived `STRATUM` field (appended last).
    pub fn field_domains(&self) -> FieldDomains {
        let mut domains = self.domains.clone();
        domains.insert(STRATUM_FIELD.to_string(), self.stratum_keys());
        domains
    }

    pub fn is_non_count(&self, measure: Measure) -> bool {
        self.non_count_measures.contains(&measure)
    }
}

/// Compose a stratum key: `{dim}_{category}` per dimension, joined with the
/// separator and lowercased.
pub fn stratum_key<'a>(parts: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    parts
        .into_iter()
        .map(|(dim, cat)| format!("{dim}{STRATUM_SEPARATOR}{cat}"))
        .collect::<Vec<_>>()
        .join(STRATUM_SEPARATOR)
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = ResultsConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.domains["YEAR"], vec!["2022", "2023"]);
        assert_eq!(cfg.templates.len(), Measure::ALL.len());
    }

    #[test]
    fn stratum_keys_are_cartesian_and_lowercase() {
        let mut cfg = ResultsConfig::default();
        cfg.stratification = vec![
            DimensionSpec::new("sex", &["Male", "Female"]),
            DimensionSpec::new("wasting_state", &["cat1", "cat2"]),
        ];
        assert_eq!(
            cfg.stratum_keys(),
            vec![
                "sex_male_wasting_state_cat1",
                "sex_male_wasting_state_cat2",
                "sex_female_wasting_state_cat1",
                "sex_female_wasting_state_cat2",
            ]
        );
        let fields = cfg.stratum_fields("sex_female_wasting_state_cat2").unwrap();
        assert_eq!(fields[0], ("sex".to_string(), "Female".to_string()));
        assert_eq!(fields[1], ("wasting_state".to_string(), "cat2".to_string()));
    }

    #[test]
    fn cause_domains_keep_declared_order() {
        let cfg = ResultsConfig::default();
        assert_eq!(
            cfg.domains["CAUSE_OF_DEATH"],
            vec![
                "other_causes",
                "diarrheal_diseases",
                "measles",
                "lower_respiratory_infections",
                "moderate_protein_energy_malnutrition",
                "severe_protein_energy_malnutrition",
            ]
        );
        assert_eq!(cfg.domains["CAUSE_OF_DISABILITY"], cfg.domains["CAUSE_OF_DEATH"][1..]);
    }

    #[test]
    fn stratum_index_covers_every_key() {
        let mut cfg = ResultsConfig::default();
        cfg.stratification = vec![
            DimensionSpec::new("sex", &["male", "female"]),
            DimensionSpec::new("wasting_state", &["cat1", "cat2"]),
        ];
        let index = cfg.stratum_index();
        assert_eq!(index.len(), 4);
        for key in cfg.stratum_keys() {
            assert_eq!(index.get(&key), cfg.stratum_fields(&key).as_ref());
        }
        assert_eq!(
            index["sex_male_wasting_state_cat2"],
            vec![
                ("sex".to_string(), "male".to_string()),
                ("wasting_state".to_string(), "cat2".to_string()),
            ]
        );
    }

    #[test]
    fn no_dimensions_means_single_empty_stratum() {
        let mut cfg = ResultsConfig::default();
        cfg.stratification.clear();
        assert_eq!(cfg.stratum_keys(), vec![String::new()]);
    }

    #[test]
    fn yaml_overrides_merge_with_defaults() {
        let yaml = r#"
stratification:
  - name: sex
    categories: [male, female]
baseline_scenario: status_quo
non_count_measures: [ylds]
"#;
        let cfg = ResultsConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.stratification.len(), 1);
        assert_eq!(cfg.baseline_scenario, "status_quo");
        assert!(cfg.is_non_count(Measure::Ylds));
        // Untouched sections keep their defaults.
        assert!(cfg.domains.contains_key("AGE_GROUP"));
    }

    #[test]
    fn duplicate_dimension_is_rejected() {
        let yaml = r#"
stratification:
  - name: sex
    categories: [male]
  - name: sex
    categories: [female]
"#;
        assert!(matches!(
            ResultsConfig::from_yaml_str(yaml),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn declaring_stratum_domain_is_rejected() {
        let mut cfg = ResultsConfig::default();
        cfg.domains.insert(STRATUM_FIELD.into(), vec!["x".into()]);
        assert!(cfg.validate().is_err());
    }
}
