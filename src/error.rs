//! Error types for item-matcher operations.
//!
//! Every stage of the pipeline has its own error type so callers can tell a
//! bad input shard from a corrupt artifact or an invalid query:
//!
//! - [`LoadError`]: malformed or missing embedding input
//! - [`BuildError`]: invalid build parameters or an empty corpus
//! - [`PersistenceError`]: missing or corrupt index artifacts
//! - [`QueryError`]: invalid query vector, identifier or neighbor count
//!
//! [`Error`] wraps all of them for code that drives a whole pipeline.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Any error raised by the item-matcher pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Loading embeddings failed.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Building the index failed.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Saving or loading index artifacts failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// A query was rejected.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Settings could not be extracted.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
}

/// Errors raised while reading embedding shards.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The source pattern matched no shard.
    #[error("no embedding files match '{pattern}'")]
    NoShards {
        /// The pattern that was searched.
        pattern: String,
    },

    /// The source pattern could not be compiled.
    #[error("invalid source pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A shard could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// Shard path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A record is missing its identifier or vector, or has unparsable values.
    #[error("malformed record at {}:{line}: {reason}", path.display())]
    Malformed {
        /// Shard path.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// What is wrong with the record.
        reason: String,
    },

    /// A record's dimensionality differs from the rest of the corpus.
    #[error("dimension mismatch for '{identifier}': expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Identifier of the offending record.
        identifier: String,
        /// Dimension established by earlier records.
        expected: usize,
        /// Dimension of this record.
        actual: usize,
    },

    /// An identifier occurred twice under the `Reject` reduction.
    #[error("duplicate identifier '{0}'")]
    DuplicateIdentifier(String),

    /// A (reduced) vector has zero norm and cannot be normalized.
    #[error("embedding for '{0}' has zero norm")]
    ZeroVector(String),
}

impl LoadError {
    /// Creates a new `Malformed` error.
    pub fn malformed(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }

    /// Creates a new `Io` error.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while building an index.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    /// The embedding matrix has no rows.
    #[error("cannot build an index from an empty matrix")]
    EmptyMatrix,

    /// More leaves were requested than there are rows to fill them.
    #[error("num_leaves {num_leaves} exceeds row count {rows}")]
    TooManyLeaves {
        /// Requested leaf count.
        num_leaves: usize,
        /// Rows in the matrix.
        rows: usize,
    },

    /// Invalid parameter value provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl BuildError {
    /// Creates a new `InvalidParameter` error.
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }
}

/// Errors raised while saving or loading index artifacts.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An expected artifact is not present in the index directory.
    #[error("missing artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    /// Checksum verification failed during loading.
    #[error("checksum mismatch in {0}: file may be corrupted")]
    ChecksumMismatch(&'static str),

    /// An artifact has an invalid or unrecognized layout.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Error during serialization or deserialization.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The vocabulary sidecar does not belong to the index next to it.
    #[error("vocabulary does not match index: {0}")]
    VocabularyMismatch(String),
}

impl PersistenceError {
    /// Creates a new `InvalidFormat` error.
    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }

    /// Creates a new `VocabularyMismatch` error.
    pub fn vocabulary_mismatch(msg: impl Into<String>) -> Self {
        Self::VocabularyMismatch(msg.into())
    }
}

impl From<bincode::Error> for PersistenceError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors raised for an individual match query.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Query dimensions do not match the index dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Index dimension.
        expected: usize,
        /// Query dimension.
        actual: usize,
    },

    /// Zero neighbors were requested.
    #[error("number of matches must be at least 1")]
    ZeroNumMatches,

    /// The number of requested neighbors is zero or above the allowed cap.
    #[error("invalid number of matches {requested} (allowed 1..={max})")]
    InvalidNumMatches {
        /// Requested neighbor count.
        requested: usize,
        /// Largest allowed neighbor count.
        max: usize,
    },

    /// The query vector has zero norm.
    #[error("query vector has zero norm")]
    ZeroVector,

    /// The query vector contains NaN or infinite components.
    #[error("query vector contains non-finite values")]
    NonFinite,

    /// No identifier was supplied.
    #[error("query is empty: provide item identifier(s) or a vector")]
    EmptyQuery,

    /// An identifier in the query is not part of the vocabulary.
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
}

impl QueryError {
    /// Creates a new `DimensionMismatch` error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }
}
