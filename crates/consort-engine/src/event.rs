//! Events published by a sync session.

use consort_core::{DeviceId, GlobalId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Why a sync run was requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    LocalSave,
    RemoteChange,
    ForegroundResume,
    Manual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Leech,
    Merge,
    Deleech,
    Rebase,
    RecordLocalSaves,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncOperation::Leech => "leech",
            SyncOperation::Merge => "merge",
            SyncOperation::Deleech => "deleech",
            SyncOperation::Rebase => "rebase",
            SyncOperation::RecordLocalSaves => "record-local-saves",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleechReason {
    Requested,
    /// The cloud account changed since the store leeched.
    IdentityChanged,
    /// A rebase folded away change sets this device had not merged.
    BaselineSuperseded,
}

/// Outcome of one merge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Local change sets newly written to the cloud.
    pub uploaded: usize,
    /// Remote change sets applied.
    pub applied: usize,
    /// Remote change sets left for a later merge, waiting on a dependency.
    pub deferred: usize,
    /// Properties whose concurrent writes went to the resolver.
    pub conflicts_resolved: usize,
    /// Remote change sets that could not be decoded and were skipped.
    /// Later sets of the same device wait behind them.
    pub unreadable: usize,
    /// Writes added by the merge repair hook.
    pub repaired: usize,
    pub touched_objects: BTreeSet<GlobalId>,
}

impl MergeReport {
    pub fn is_noop(&self) -> bool {
        self.uploaded == 0 && self.applied == 0
    }
}

/// Events emitted by a sync session.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    /// An operation started. `trigger` is set for scheduled runs.
    SyncStarted {
        operation: SyncOperation,
        trigger: Option<SyncTrigger>,
    },
    SyncFinished {
        operation: SyncOperation,
        result: Result<(), String>,
    },
    MergeFinished(MergeReport),
    Leeched { device: DeviceId },
    Deleeched { reason: DeleechReason },
    LocalChangesRecorded { count: usize },
}
