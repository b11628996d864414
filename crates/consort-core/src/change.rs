//! Object changes and the immutable change sets that carry them.

use crate::ids::{DeviceId, GlobalId};
use crate::record::Stamp;
use crate::revision::{Revision, RevisionSet};
use crate::value::Properties;
use serde::{Deserialize, Serialize};

/// What happened to an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One object's change inside a change set.
///
/// Inserts carry every property, updates only the changed ones, deletes none.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectChange {
    pub global_id: GlobalId,
    pub entity: String,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
}

impl ObjectChange {
    pub fn insert(global_id: GlobalId, entity: impl Into<String>, properties: Properties) -> Self {
        Self {
            global_id,
            entity: entity.into(),
            kind: ChangeKind::Insert,
            properties,
        }
    }

    pub fn update(global_id: GlobalId, entity: impl Into<String>, properties: Properties) -> Self {
        Self {
            global_id,
            entity: entity.into(),
            kind: ChangeKind::Update,
            properties,
        }
    }

    pub fn delete(global_id: GlobalId, entity: impl Into<String>) -> Self {
        Self {
            global_id,
            entity: entity.into(),
            kind: ChangeKind::Delete,
            properties: Properties::new(),
        }
    }
}

/// The unit of replication: one local save, as recorded by one device.
///
/// Never mutated once written. `dependencies` holds everything the producing
/// device had applied when it recorded the save, including its own previous
/// sequence, and fixes where the set sits in the causal order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub revision: Revision,
    /// Milliseconds since the Unix epoch, taken from the local save.
    pub timestamp: i64,
    pub dependencies: RevisionSet,
    pub changes: Vec<ObjectChange>,
}

impl ChangeSet {
    pub fn new(
        revision: Revision,
        timestamp: i64,
        dependencies: RevisionSet,
        changes: Vec<ObjectChange>,
    ) -> Self {
        Self {
            revision,
            timestamp,
            dependencies,
            changes,
        }
    }

    pub fn device(&self) -> &DeviceId {
        &self.revision.device
    }

    pub fn sequence(&self) -> u64 {
        self.revision.sequence
    }

    /// Stamp attached to every write of this change set.
    pub fn stamp(&self) -> Stamp {
        Stamp::new(
            self.revision.clone(),
            self.timestamp,
            self.dependencies.clone(),
        )
    }

    /// True once every dependency is covered by `applied` and this set is
    /// the next one from its device.
    pub fn is_ready(&self, applied: &RevisionSet) -> bool {
        applied.get(self.device()) + 1 == self.sequence() && applied.dominates(&self.dependencies)
    }
}
