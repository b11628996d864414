//! Objects, local saves and the notifications they produce.

use consort_core::{GlobalId, Properties, Value};
use serde::{Deserialize, Serialize};

/// An object as the local store holds it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub global_id: GlobalId,
    pub entity: String,
    pub properties: Properties,
}

impl StoredObject {
    pub fn new(global_id: GlobalId, entity: impl Into<String>, properties: Properties) -> Self {
        Self {
            global_id,
            entity: entity.into(),
            properties,
        }
    }

    pub fn get(&self, property: &str) -> Option<&Value> {
        self.properties.get(property)
    }
}

/// One object touched by a save, with enough detail to diff it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SavedObject {
    Inserted {
        global_id: Option<GlobalId>,
        entity: String,
        properties: Properties,
    },
    Updated {
        global_id: Option<GlobalId>,
        entity: String,
        before: Properties,
        after: Properties,
    },
    Deleted {
        global_id: Option<GlobalId>,
        entity: String,
    },
}

impl SavedObject {
    pub fn global_id(&self) -> Option<&GlobalId> {
        match self {
            SavedObject::Inserted { global_id, .. }
            | SavedObject::Updated { global_id, .. }
            | SavedObject::Deleted { global_id, .. } => global_id.as_ref(),
        }
    }

    pub fn entity(&self) -> &str {
        match self {
            SavedObject::Inserted { entity, .. }
            | SavedObject::Updated { entity, .. }
            | SavedObject::Deleted { entity, .. } => entity,
        }
    }
}

/// What the store reports after each application save.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaveNotification {
    /// Position in the store's save log; strictly increasing.
    pub cursor: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub objects: Vec<SavedObject>,
}

/// Saves not yet acknowledged by the engine, and the store's latest cursor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PendingSaves {
    pub cursor: u64,
    pub saves: Vec<SaveNotification>,
}

impl PendingSaves {
    pub fn is_empty(&self) -> bool {
        self.saves.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum SaveOp {
    Put {
        global_id: GlobalId,
        entity: String,
        properties: Properties,
    },
    Patch {
        global_id: GlobalId,
        properties: Properties,
    },
    Delete {
        global_id: GlobalId,
    },
    Untracked {
        entity: String,
        properties: Properties,
    },
}

/// An application save, applied atomically by the store.
///
/// ```rust
/// use consort_core::{properties, GlobalId};
/// use consort_store::LocalSave;
///
/// let save = LocalSave::new()
///     .put(GlobalId::new("n"), "Number", properties([("number", 5i64)]))
///     .delete(GlobalId::new("old"));
/// assert_eq!(save.len(), 2);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocalSave {
    pub(crate) ops: Vec<SaveOp>,
    pub(crate) timestamp: Option<i64>,
}

impl LocalSave {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the object, or replace every property of an existing one.
    pub fn put(mut self, global_id: GlobalId, entity: impl Into<String>, properties: Properties) -> Self {
        self.ops.push(SaveOp::Put {
            global_id,
            entity: entity.into(),
            properties,
        });
        self
    }

    /// Overwrite some properties of an existing object.
    pub fn patch(mut self, global_id: GlobalId, properties: Properties) -> Self {
        self.ops.push(SaveOp::Patch {
            global_id,
            properties,
        });
        self
    }

    pub fn delete(mut self, global_id: GlobalId) -> Self {
        self.ops.push(SaveOp::Delete { global_id });
        self
    }

    /// Insert an object the application never gave a global id. It is
    /// reported in the save notification but cannot be synced.
    pub fn put_untracked(mut self, entity: impl Into<String>, properties: Properties) -> Self {
        self.ops.push(SaveOp::Untracked {
            entity: entity.into(),
            properties,
        });
        self
    }

    /// Override the save timestamp (milliseconds since the Unix epoch).
    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
