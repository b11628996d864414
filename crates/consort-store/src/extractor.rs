//! Turns save notifications into object changes.
//!
//! Updates become property-level diffs: unchanged properties are omitted and
//! a property that disappeared is written as `Null`. Several entries for the
//! same object in one save collapse into a single change.

use crate::error::ExtractionError;
use crate::save::{SaveNotification, SavedObject};
use consort_core::{ChangeKind, GlobalId, ObjectChange, Properties, Value};
use std::collections::BTreeMap;

pub struct ChangeSetExtractor;

impl ChangeSetExtractor {
    /// Extract every change of `save`, failing on the first object without
    /// a global id.
    pub fn extract(save: &SaveNotification) -> Result<Vec<ObjectChange>, ExtractionError> {
        let (changes, errors) = Self::extract_lenient(save);
        match errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(changes),
        }
    }

    /// Extract what can be extracted; offending objects are excluded and
    /// returned as errors.
    pub fn extract_lenient(save: &SaveNotification) -> (Vec<ObjectChange>, Vec<ExtractionError>) {
        let mut errors = Vec::new();
        let mut order: Vec<GlobalId> = Vec::new();
        let mut changes: BTreeMap<GlobalId, ObjectChange> = BTreeMap::new();

        for object in &save.objects {
            let Some(global_id) = object.global_id() else {
                errors.push(ExtractionError::MissingGlobalId {
                    entity: object.entity().to_string(),
                });
                continue;
            };

            let Some(change) = Self::object_change(global_id, object) else {
                continue;
            };

            match changes.remove(global_id) {
                Some(previous) => {
                    changes.insert(global_id.clone(), Self::coalesce(previous, change));
                }
                None => {
                    order.push(global_id.clone());
                    changes.insert(global_id.clone(), change);
                }
            }
        }

        let changes = order
            .into_iter()
            .filter_map(|id| changes.remove(&id))
            .collect();
        (changes, errors)
    }

    fn object_change(global_id: &GlobalId, object: &SavedObject) -> Option<ObjectChange> {
        match object {
            SavedObject::Inserted {
                entity, properties, ..
            } => Some(ObjectChange::insert(
                global_id.clone(),
                entity.clone(),
                properties.clone(),
            )),
            SavedObject::Updated {
                entity,
                before,
                after,
                ..
            } => {
                let diff = Self::diff(before, after);
                (!diff.is_empty()).then(|| ObjectChange::update(global_id.clone(), entity.clone(), diff))
            }
            SavedObject::Deleted { entity, .. } => {
                Some(ObjectChange::delete(global_id.clone(), entity.clone()))
            }
        }
    }

    fn diff(before: &Properties, after: &Properties) -> Properties {
        let mut diff = Properties::new();
        for (name, value) in after {
            if before.get(name) != Some(value) {
                diff.insert(name.clone(), value.clone());
            }
        }
        for name in before.keys() {
            if !after.contains_key(name) {
                diff.insert(name.clone(), Value::Null);
            }
        }
        diff
    }

    fn coalesce(previous: ObjectChange, next: ObjectChange) -> ObjectChange {
        use ChangeKind::*;
        match (previous.kind, next.kind) {
            (_, Delete) => next,
            (Delete, Insert) | (Update, Insert) | (Insert, Insert) => next,
            (Insert, Update) | (Update, Update) => {
                let mut merged = previous;
                merged.properties.extend(next.properties);
                if merged.kind == Insert {
                    merged.properties.retain(|_, v| !v.is_null());
                }
                merged
            }
            // an update after a delete within one save resurrects nothing
            (Delete, Update) => previous,
        }
    }
}
