//! Error types for the local store layer.

use consort_core::GlobalId;
use thiserror::Error;

/// Errors raised by a local store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The application saved after the transaction was prepared.
    #[error("Save conflict: transaction expected save cursor {expected}, store is at {actual}")]
    SaveConflict { expected: u64, actual: u64 },

    #[error("Unknown object: {0}")]
    UnknownObject(GlobalId),

    #[error("Commit failed: {0}")]
    CommitFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// A saved object that cannot be turned into an object change.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("{entity} object saved without a global id")]
    MissingGlobalId { entity: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
