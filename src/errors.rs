use std::io;

use thiserror::Error;

use crate::types::{Iteration, StructureKey};

/// Error type for record ingest, covariance construction, and batch production failures.
#[derive(Debug, Error)]
pub enum SamplerError {
    /// A validation record could not be parsed.
    #[error("malformed record at line {line}: {reason}")]
    MalformedRecord {
        /// 1-based line number.
        line: usize,
        /// What was wrong with the line.
        reason: String,
    },
    /// Duplicate records of one structure disagree on its truth.
    #[error("structure '{key}' has inconsistent ground truth across duplicate records")]
    InconsistentTemplate {
        /// Structure key shared by the records.
        key: StructureKey,
    },
    /// A fingerprint or prediction does not match the schema width.
    #[error("fingerprint length mismatch: expected {expected}, found {found}")]
    SchemaMismatch {
        /// Width the sampler was built for.
        expected: usize,
        /// Width that was supplied.
        found: usize,
    },
    /// Invalid edge list or corpus for the covariance tree.
    #[error("covariance tree error: {0}")]
    Covariance(String),
    /// Conditional sampling requested before a tree was built.
    #[error("no covariance tree has been built for this sampler")]
    MissingCovarianceTree,
    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The dataset could not supply a compound.
    #[error("dataset error: {0}")]
    Dataset(String),
    /// The producer was stopped.
    #[error("batch producer stopped")]
    Stopped,
    /// A synthesis worker panicked; the iteration is skipped.
    #[error("batch synthesis panicked at iteration {iteration}")]
    WorkerPanic {
        /// Iteration whose batch was lost.
        iteration: Iteration,
    },
    /// Reading an input file failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}
