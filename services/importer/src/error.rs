//! Error kinds raised by the import stages.
//!
//! Row-level problems (missing keys, unmatched joins, unknown occupation
//! codes) are never errors: they are tallied as drops in [`crate::model::DropTally`].

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EtlError {
    #[error("source file not found: {}", path.display())]
    MissingSource { path: PathBuf },

    #[error("source '{source_name}' has no column '{column}' (expected header '{header}')")]
    SchemaMismatch {
        source_name: String,
        column: String,
        header: String,
    },

    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed tabular data in '{source_name}': {source}")]
    Csv {
        source_name: String,
        #[source]
        source: csv::Error,
    },

    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("invalid table definition: {0}")]
    InvalidTable(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Transitions of the import state machine, named after the work they do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Schema,
    Facilities,
    Aggregates,
    Demographics,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Schema => "schema",
            Stage::Facilities => "facilities",
            Stage::Aggregates => "aggregates",
            Stage::Demographics => "demographics",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single failure surfaced by the orchestrator.
#[derive(Debug, Error)]
#[error("import failed during '{stage}' stage: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: EtlError,
}

impl PipelineError {
    pub fn new(stage: Stage, source: EtlError) -> Self {
        Self { stage, source }
    }
}
