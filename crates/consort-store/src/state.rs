//! Sync metadata persisted alongside the local store.
//!
//! Everything the engine must remember between runs lives in one
//! [`SyncState`] value that is committed in the same transaction as the
//! object writes it describes, so the two can never disagree after a crash.

use consort_core::{ChangeSet, ContentHash, DeviceId, RecordTable, RevisionSet};
use serde::{Deserialize, Serialize};

/// Membership of the local store in an ensemble.
///
/// `Leeching` only exists in memory while a leech runs; it is never committed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeechState {
    #[default]
    NotLeeched,
    Leeching,
    Leeched,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub leech_state: LeechState,
    pub ensemble_id: Option<String>,
    pub device: Option<DeviceId>,
    /// Sequence of the last change set recorded by this device.
    pub sequence: u64,
    /// Last merged sequence per remote device.
    pub merge_records: RevisionSet,
    /// Merge bookkeeping of every synced object.
    pub records: RecordTable,
    /// Recorded change sets not yet confirmed in the cloud.
    pub pending_uploads: Vec<ChangeSet>,
    pub baseline: Option<ContentHash>,
    /// Cloud identity in effect when the store leeched.
    pub identity_token: Option<String>,
    pub leeched_at: Option<i64>,
}

impl SyncState {
    pub fn is_leeched(&self) -> bool {
        self.leech_state == LeechState::Leeched
    }

    /// Everything applied locally: merged remote sets plus our own.
    pub fn applied(&self) -> RevisionSet {
        let mut applied = self.merge_records.clone();
        if let Some(device) = &self.device {
            applied.set(device.clone(), self.sequence);
        }
        applied
    }
}
