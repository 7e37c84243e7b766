// src/stratify/mod.rs
//
// Runtime stratification: declare dimensions once, tag every individual with a
// stratum key once per step.

pub mod registry;
pub mod stratifier;

pub use registry::{
    Category, DerivedFn, OverlapPolicy, Predicate, Source, StratificationDimension,
    StratificationRegistry,
};
pub use stratifier::{PopulationStratifier, StratumAssignment};
