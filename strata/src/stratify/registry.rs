// src/stratify/registry.rs
//
// Stratification declarations: dimensions, their ordered categories and the
// population source each dimension reads. Declared once at startup and never
// mutated once the stratifier owns the registry.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::{stratum_key, DimensionSpec, ResultsConfig};
use crate::error::{Error, Result};
use crate::population::{FieldValue, PopulationSnapshot};

/// Where a dimension reads its per-individual value from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A state-table column present in the snapshot.
    Column(String),
    /// A value computed from the snapshot once per step.
    Derived(String),
}

impl Source {
    pub fn column(name: &str) -> Self {
        Source::Column(name.to_string())
    }

    pub fn derived(name: &str) -> Self {
        Source::Derived(name.to_string())
    }

    pub fn name(&self) -> &str {
        match self {
            Source::Column(n) | Source::Derived(n) => n,
        }
    }
}

/// Match predicate over one source value.
#[derive(Clone)]
pub enum Predicate {
    Equals(FieldValue),
    OneOf(Vec<FieldValue>),
    /// Numeric half-open interval `[min, max)`.
    Between { min: f64, max: f64 },
    Custom(Arc<dyn Fn(&FieldValue) -> bool + Send + Sync>),
}

impl Predicate {
    pub fn custom(f: impl Fn(&FieldValue) -> bool + Send + Sync + 'static) -> Self {
        Predicate::Custom(Arc::new(f))
    }

    pub fn matches(&self, value: &FieldValue) -> bool {
        match self {
            Predicate::Equals(expected) => value == expected,
            Predicate::OneOf(options) => options.contains(value),
            Predicate::Between { min, max } => value
                .as_f64()
                .map(|x| x >= *min && x < *max)
                .unwrap_or(false),
            Predicate::Custom(f) => f(value),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Equals(v) => f.debug_tuple("Equals").field(v).finish(),
            Predicate::OneOf(vs) => f.debug_tuple("OneOf").field(vs).finish(),
            Predicate::Between { min, max } => f
                .debug_struct("Between")
                .field("min", min)
                .field("max", max)
                .finish(),
            Predicate::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Category {
    pub label: String,
    pub predicate: Predicate,
}

impl Category {
    pub fn new(label: &str, predicate: Predicate) -> Self {
        Self {
            label: label.to_string(),
            predicate,
        }
    }

    /// Category matching rows whose source value equals the label itself.
    pub fn equals(label: &str) -> Self {
        Self::new(label, Predicate::Equals(FieldValue::from(label)))
    }
}

/// How to resolve a row that matches more than one category of a dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverlapPolicy {
    /// Categories are applied in order and later matches overwrite earlier ones.
    #[default]
    LastMatchWins,
    /// The first matching category in declaration order is kept.
    FirstMatchWins,
    /// Overlap is a configuration error.
    Reject,
}

#[derive(Debug, Clone)]
pub struct StratificationDimension {
    pub name: String,
    pub categories: Vec<Category>,
    pub source: Source,
}

impl StratificationDimension {
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(|c| c.label.as_str())
    }
}

pub type DerivedFn = Box<dyn Fn(&PopulationSnapshot) -> Result<Vec<FieldValue>>>;

#[derive(Default)]
pub struct StratificationRegistry {
    dimensions: Vec<StratificationDimension>,
    derived: IndexMap<String, DerivedFn>,
    overlap: OverlapPolicy,
}

impl fmt::Debug for StratificationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StratificationRegistry")
            .field("dimensions", &self.dimensions)
            .field("derived", &self.derived.keys().collect::<Vec<_>>())
            .field("overlap", &self.overlap)
            .finish()
    }
}

impl StratificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overlap_policy(mut self, policy: OverlapPolicy) -> Self {
        self.overlap = policy;
        self
    }

    pub fn overlap_policy(&self) -> OverlapPolicy {
        self.overlap
    }

    /// Declare a dimension. Names must be unique and categories non-empty with
    /// distinct labels.
    pub fn register(
        &mut self,
        dimension_name: &str,
        categories: Vec<Category>,
        source: Source,
    ) -> Result<()> {
        if dimension_name.is_empty() {
            return Err(Error::config("dimension name cannot be empty"));
        }
        if self.dimensions.iter().any(|d| d.name == dimension_name) {
            return Err(Error::config(format!(
                "dimension '{dimension_name}' is already registered"
            )));
        }
        if categories.is_empty() {
            return Err(Error::config(format!(
                "dimension '{dimension_name}' has no categories"
            )));
        }
        for (i, c) in categories.iter().enumerate() {
            if c.label.is_empty() {
                return Err(Error::config(format!(
                    "dimension '{dimension_name}' has an empty category label"
                )));
            }
            if categories[..i]
                .iter()
                .any(|p| p.label.eq_ignore_ascii_case(&c.label))
            {
                return Err(Error::config(format!(
                    "dimension '{dimension_name}' declares category '{}' twice",
                    c.label
                )));
            }
        }

        self.dimensions.push(StratificationDimension {
            name: dimension_name.to_string(),
            categories,
            source,
        });
        Ok(())
    }

    /// Register the computation behind a `Source::Derived` name.
    pub fn register_derived(
        &mut self,
        name: &str,
        compute: impl Fn(&PopulationSnapshot) -> Result<Vec<FieldValue>> + 'static,
    ) -> Result<()> {
        if self.derived.contains_key(name) {
            return Err(Error::config(format!(
                "derived value '{name}' is already registered"
            )));
        }
        self.derived.insert(name.to_string(), Box::new(compute));
        Ok(())
    }

    /// Register every configured dimension with equality categories, reading
    /// the source given for it in `sources`.
    pub fn from_config(config: &ResultsConfig, sources: &IndexMap<String, Source>) -> Result<Self> {
        let mut registry = Self::new();
        for spec in &config.stratification {
            let source = sources.get(&spec.name).cloned().ok_or_else(|| {
                Error::config(format!("no source given for dimension '{}'", spec.name))
            })?;
            let categories = spec.categories.iter().map(|c| Category::equals(c)).collect();
            registry.register(&spec.name, categories, source)?;
        }
        Ok(registry)
    }

    pub fn dimensions(&self) -> &[StratificationDimension] {
        &self.dimensions
    }

    pub fn derived(&self, name: &str) -> Option<&DerivedFn> {
        self.derived.get(name)
    }

    /// Labels-only view of the registry, in registration order.
    pub fn vocabulary(&self) -> Vec<DimensionSpec> {
        self.dimensions
            .iter()
            .map(|d| DimensionSpec {
                name: d.name.clone(),
                categories: d.labels().map(str::to_string).collect(),
            })
            .collect()
    }

    /// Every stratum key this registry can produce, in cartesian order.
    pub fn stratum_keys(&self) -> Vec<String> {
        let mut keys: Vec<Vec<(&str, &str)>> = vec![Vec::new()];
        for dim in &self.dimensions {
            keys = keys
                .into_iter()
                .flat_map(|prefix| {
                    dim.labels().map(move |label| {
                        let mut k = prefix.clone();
                        k.push((dim.name.as_str(), label));
                        k
                    })
                })
                .collect();
        }
        keys.into_iter().map(stratum_key).collect()
    }

    /// Assert the runtime labels agree with the schema's stratum vocabulary.
    pub fn check_vocabulary(&self, config: &ResultsConfig) -> Result<()> {
        let runtime = self.stratum_keys();
        let schema = config.stratum_keys();
        if runtime != schema {
            let missing: Vec<_> = runtime.iter().filter(|k| !schema.contains(k)).collect();
            return Err(Error::config(format!(
                "runtime stratum vocabulary differs from the column schema; keys not in schema: {missing:?}"
            )));
        }
        Ok(())
    }
}
