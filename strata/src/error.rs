// src/error.rs
//
// Error taxonomy for the stratified results pipeline.
//
// Structural errors (configuration, unknown measure, missing keyspace) always
// propagate. Corrupt run files are recovered locally by the collector, which
// logs and skips them.

use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid stratification or schema declaration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A stratifier or observer source is absent from the population snapshot.
    #[error("missing column '{column}' required by {required_by}")]
    MissingColumn { column: String, required_by: String },

    /// A snapshot column does not have one value per individual.
    #[error("column '{column}' has {found} values, expected {expected}")]
    ColumnLength {
        column: String,
        expected: usize,
        found: usize,
    },

    /// The measure has no declared column template.
    #[error("unknown measure '{0}'")]
    UnknownMeasure(String),

    /// The column is not produced by the measure's template.
    #[error("unknown column '{column}' for measure '{measure}'")]
    UnknownColumn { column: String, measure: String },

    /// A consumer read stratum assignments before the stratifier ran this step.
    #[error("stratification for step {step} has not been prepared")]
    StratificationNotReady { step: u64 },

    /// A run output file is unreadable or malformed.
    #[error("corrupt run file {}: {reason}", path.display())]
    CorruptRun { path: PathBuf, reason: String },

    /// The keyspace descriptor is missing or malformed.
    #[error("incomplete keyspace: {0}")]
    IncompleteKeyspace(String),

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {what}: {reason}")]
    Serialize { what: String, reason: String },
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CorruptRun {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors that must abort a whole offline invocation.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_)
                | Error::UnknownMeasure(_)
                | Error::IncompleteKeyspace(_)
                | Error::StratificationNotReady { .. }
        )
    }
}
