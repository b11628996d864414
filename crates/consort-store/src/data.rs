//! Store contents shared by the reference store implementations.

use crate::error::{Result, StoreError};
use crate::save::{LocalSave, PendingSaves, SaveNotification, SaveOp, SavedObject, StoredObject};
use crate::state::SyncState;
use crate::store::Transaction;
use consort_core::{now_millis, GlobalId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoreData {
    pub objects: BTreeMap<GlobalId, StoredObject>,
    pub saves: Vec<SaveNotification>,
    pub save_cursor: u64,
    pub sync_state: Option<SyncState>,
}

impl StoreData {
    /// Apply an application save, recording its notification.
    pub fn save(&mut self, save: LocalSave) -> Result<SaveNotification> {
        let mut objects = self.objects.clone();
        let mut saved = Vec::with_capacity(save.ops.len());

        for op in save.ops {
            match op {
                SaveOp::Put {
                    global_id,
                    entity,
                    properties,
                } => {
                    let object = StoredObject::new(global_id.clone(), entity.clone(), properties.clone());
                    match objects.insert(global_id.clone(), object) {
                        Some(before) => saved.push(SavedObject::Updated {
                            global_id: Some(global_id),
                            entity,
                            before: before.properties,
                            after: properties,
                        }),
                        None => saved.push(SavedObject::Inserted {
                            global_id: Some(global_id),
                            entity,
                            properties,
                        }),
                    }
                }
                SaveOp::Patch {
                    global_id,
                    properties,
                } => {
                    let object = objects
                        .get_mut(&global_id)
                        .ok_or_else(|| StoreError::UnknownObject(global_id.clone()))?;
                    let before = object.properties.clone();
                    object.properties.extend(properties);
                    saved.push(SavedObject::Updated {
                        global_id: Some(global_id),
                        entity: object.entity.clone(),
                        before,
                        after: object.properties.clone(),
                    });
                }
                SaveOp::Delete { global_id } => {
                    let object = objects
                        .remove(&global_id)
                        .ok_or_else(|| StoreError::UnknownObject(global_id.clone()))?;
                    saved.push(SavedObject::Deleted {
                        global_id: Some(global_id),
                        entity: object.entity,
                    });
                }
                SaveOp::Untracked { entity, properties } => {
                    saved.push(SavedObject::Inserted {
                        global_id: None,
                        entity,
                        properties,
                    });
                }
            }
        }

        self.objects = objects;
        self.save_cursor += 1;
        let notification = SaveNotification {
            cursor: self.save_cursor,
            timestamp: save.timestamp.unwrap_or_else(now_millis),
            objects: saved,
        };
        self.saves.push(notification.clone());
        Ok(notification)
    }

    pub fn pending(&self) -> PendingSaves {
        PendingSaves {
            cursor: self.save_cursor,
            saves: self.saves.clone(),
        }
    }

    /// Validate then apply; nothing changes when validation fails.
    pub fn apply(&mut self, transaction: Transaction) -> Result<()> {
        if let Some(expected) = transaction.expected_save_cursor {
            if expected != self.save_cursor {
                return Err(StoreError::SaveConflict {
                    expected,
                    actual: self.save_cursor,
                });
            }
        }

        if transaction.replace_objects {
            self.objects.clear();
        }
        for global_id in &transaction.deletes {
            self.objects.remove(global_id);
        }
        for object in transaction.puts {
            self.objects.insert(object.global_id.clone(), object);
        }
        if let Some(state) = transaction.sync_state {
            self.sync_state = Some(state);
        }
        if let Some(cursor) = transaction.acknowledge_saves_through {
            self.saves.retain(|s| s.cursor > cursor);
        }
        Ok(())
    }
}
