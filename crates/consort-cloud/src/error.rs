//! Error types for the cloud layer.

use consort_core::BaselineError;
use thiserror::Error;

/// Failures of the cloud file area itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Cloud unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CloudError {
    fn from(err: std::io::Error) -> Self {
        CloudError::Io(err.to_string())
    }
}

/// A cloud file that could not be decoded.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Format mismatch: expected {expected}, got {actual}")]
    FormatMismatch { expected: u8, actual: u8 },

    #[error("Expected a {expected} file, found {actual}")]
    KindMismatch { expected: String, actual: String },

    #[error("File {path} holds revision {found}")]
    RevisionMismatch { path: String, found: String },

    #[error("Invalid baseline: {0}")]
    Baseline(#[from] BaselineError),
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Serialization(err.to_string())
    }
}

/// Anything that can go wrong talking to an ensemble.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

pub type Result<T> = std::result::Result<T, RemoteError>;
