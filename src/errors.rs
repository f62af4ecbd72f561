// errors.rs - Error taxonomy for the sweep pipeline
// Purpose: Typed errors for setup, candidate parsing, probing and persistence.
//          Probe errors never cross the aggregation boundary; setup and
//          persistence errors propagate to the binary.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors raised before any probing starts
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    #[error("failed to read input file {path}: {source}")]
    UnreadableInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV {path} is missing required columns (expected {expected})")]
    MissingColumns { path: PathBuf, expected: String },

    #[error("invalid CSV {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("unknown service id: {0}")]
    UnknownService(String),

    #[error("case name '{0}' is empty after normalization")]
    EmptyCaseName(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no input provided: {0}")]
    NoInput(String),
}

/// A single malformed candidate or CSV row. Logged and skipped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CandidateParseError {
    #[error("invalid URL '{value}': {reason}")]
    InvalidUrl { value: String, reason: String },

    #[error("invalid container name '{0}'")]
    InvalidContainerName(String),

    #[error("row {row}: {reason}")]
    MalformedRow { row: usize, reason: String },

    #[error("unsafe blob name '{0}'")]
    UnsafeBlobName(String),
}

/// Per-candidate probe failure, recorded as "no hit"
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("no such record")]
    NotFound,

    #[error("timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("resolver communications failure: {0}")]
    Infrastructure(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error(transparent)]
    InvalidCandidate(#[from] CandidateParseError),
}

impl ProbeError {
    /// True when the failure says more about our tooling than about the target
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, ProbeError::Infrastructure(_))
    }
}

/// Failure to create or write part of the case tree
#[derive(Error, Debug)]
#[error("failed to write {path}: {source}")]
pub struct PersistenceError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl PersistenceError {
    pub fn new(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}

/// Umbrella error for the orchestration layer
#[derive(Error, Debug)]
pub enum SweepError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("{failed} output group(s) could not be written")]
    PartialOutput { failed: usize },
}

pub type Result<T, E = SweepError> = std::result::Result<T, E>;
