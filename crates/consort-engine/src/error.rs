//! Error taxonomy of the sync engine.

use consort_cloud::{CloudError, CodecError, RemoteError};
use consort_core::{BaselineError, ResolveError};
use consort_store::{ExtractionError, StoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Cloud transport failed: {0}")]
    Transport(#[from] CloudError),

    #[error("Invalid cloud file: {0}")]
    Codec(#[from] CodecError),

    #[error("Leech failed: {0}")]
    Leech(#[source] Box<SyncError>),

    #[error("Conflict resolution failed: {0}")]
    MergeConflictInternal(#[from] ResolveError),

    #[error("Local store failed: {0}")]
    Commit(#[from] StoreError),

    #[error("The application saved while a merge was running")]
    SaveOccurredDuringMerge,

    #[error("The application saved while a leech was running")]
    SaveOccurredDuringLeech,

    #[error("The store is not leeched into an ensemble")]
    NotLeeched,

    #[error("The scheduler is not running")]
    SchedulerStopped,

    #[error("The cloud identity changed; the store was deleeched")]
    CloudIdentityChanged,

    #[error("Change sets this device needs were folded into a newer baseline; the store was deleeched")]
    BaselineSuperseded,

    #[error("The merge repair hook vetoed the merged changes")]
    MergeVetoed,

    #[error("Operation cancelled")]
    Cancelled,
}

/// Coarse classification of a [`SyncError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Extraction,
    Transport,
    Codec,
    Leech,
    MergeConflict,
    Commit,
    SaveConflict,
    NotLeeched,
    SchedulerStopped,
    IdentityChanged,
    BaselineSuperseded,
    MergeVetoed,
    Cancelled,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Extraction(_) => ErrorKind::Extraction,
            SyncError::Transport(_) => ErrorKind::Transport,
            SyncError::Codec(_) => ErrorKind::Codec,
            SyncError::Leech(_) => ErrorKind::Leech,
            SyncError::MergeConflictInternal(_) => ErrorKind::MergeConflict,
            SyncError::Commit(_) => ErrorKind::Commit,
            SyncError::SaveOccurredDuringMerge | SyncError::SaveOccurredDuringLeech => {
                ErrorKind::SaveConflict
            }
            SyncError::NotLeeched => ErrorKind::NotLeeched,
            SyncError::SchedulerStopped => ErrorKind::SchedulerStopped,
            SyncError::CloudIdentityChanged => ErrorKind::IdentityChanged,
            SyncError::BaselineSuperseded => ErrorKind::BaselineSuperseded,
            SyncError::MergeVetoed => ErrorKind::MergeVetoed,
            SyncError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether running the same operation again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(_)
            | SyncError::Commit(_)
            | SyncError::SaveOccurredDuringMerge
            | SyncError::SaveOccurredDuringLeech
            | SyncError::BaselineSuperseded => true,
            SyncError::Leech(cause) => cause.is_retryable(),
            _ => false,
        }
    }

    /// Map a rejected commit to the save race it reports.
    pub(crate) fn from_commit(err: StoreError, during: SaveRace) -> Self {
        match (err, during) {
            (StoreError::SaveConflict { .. }, SaveRace::Merge) => SyncError::SaveOccurredDuringMerge,
            (StoreError::SaveConflict { .. }, SaveRace::Leech) => SyncError::SaveOccurredDuringLeech,
            (err, _) => SyncError::Commit(err),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum SaveRace {
    Leech,
    Merge,
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Cloud(e) => SyncError::Transport(e),
            RemoteError::Codec(e) => SyncError::Codec(e),
        }
    }
}

impl From<BaselineError> for SyncError {
    fn from(err: BaselineError) -> Self {
        SyncError::Codec(CodecError::Baseline(err))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;
