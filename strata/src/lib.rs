//! Strata: stratified simulation metrics.
//!
//! The crate covers both halves of a stratified results pipeline:
//!
//! - **Runtime** (`stratify`, `observer`, `recorder`, `step`): each step the
//!   stratifier tags every individual with a stratum key, observers count
//!   events and person-time into schema-encoded columns, and the recorder
//!   exposes the accumulated wide row when the run ends.
//!
//! - **Schema** (`schema`): the closed `Measure` set and one bidirectional
//!   column codec per measure. Runtime encoding and offline parsing go through
//!   the same codec.
//!
//! - **Offline** (`collect`, `aggregate`, `reshape`, `pipeline`): load run
//!   files, keep only draw/seed pairs complete in every scenario, sum counts
//!   over seeds and reshape to one long table per measure.
//!
//! Configuration is a single immutable `ResultsConfig` passed by reference.

pub mod aggregate;
pub mod collect;
pub mod config;
pub mod error;
pub mod models;
pub mod observer;
pub mod pipeline;
pub mod population;
pub mod recorder;
pub mod reshape;
pub mod schema;
pub mod step;
pub mod stratify;

// --- Re-exports for ergonomic external use ---------------------------------

pub use config::{stratum_key, DimensionSpec, ResultsConfig};
pub use error::{Error, Result};

pub use population::{FieldValue, IndividualId, PopulationSnapshot};
pub use stratify::{
    Category, OverlapPolicy, PopulationStratifier, Predicate, Source, StratificationRegistry,
    StratumAssignment,
};

pub use observer::{CountingObserver, Observer, StepContext, Target, Weight};
pub use recorder::MetricRecorder;
pub use step::StepDriver;

pub use schema::{ColumnCodec, ColumnSchema, Measure, MeasureGroup};

pub use aggregate::{aggregate, AggregateOptions, GroupKey, WideTable};
pub use collect::{filter_complete, Keyspace, RunCollector, RunIdentity, RunRecord, RunWriter};
pub use pipeline::{process_results, MeasureData, OutputFormat, ProcessOptions};
pub use reshape::{pivot, reshape, LongRow, LongTable};
