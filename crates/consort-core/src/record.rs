//! Per-object merge bookkeeping.
//!
//! An [`ObjectRecord`] keeps, for every property, the antichain of writes
//! that no other known write causally overwrites, together with the
//! antichains of insert and delete stamps for the object itself. Because
//! only causally-maximal entries survive, applying the same writes in any
//! causal order yields the same record, and the visible object is a pure
//! function of the record and the [`ConflictResolver`].
//!
//! Visibility rules:
//! - a property write is live only if every tombstone happened before it,
//!   so a delete beats every update concurrent with it;
//! - the object is visible only if some insert happened after every
//!   tombstone.

use crate::change::{ChangeKind, ObjectChange};
use crate::ids::GlobalId;
use crate::resolver::{Candidate, ConflictResolver, ResolveError};
use crate::revision::{Revision, RevisionSet};
use crate::value::{Properties, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Causal position of a write: the change set it came from, when it was
/// saved, and what its device had applied at that point.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    pub revision: Revision,
    pub timestamp: i64,
    pub context: RevisionSet,
}

impl Stamp {
    pub fn new(revision: Revision, timestamp: i64, context: RevisionSet) -> Self {
        Self {
            revision,
            timestamp,
            context,
        }
    }

    /// True if `other` was produced by a device that had already applied
    /// this stamp's change set.
    pub fn happened_before(&self, other: &Stamp) -> bool {
        self.revision != other.revision && other.context.contains(&self.revision)
    }

    pub fn is_concurrent_with(&self, other: &Stamp) -> bool {
        self.revision != other.revision
            && !self.happened_before(other)
            && !other.happened_before(self)
    }

    /// Total order used for last-writer-wins and for merge tie-breaks.
    pub fn order_key(&self) -> (i64, &str, u64) {
        (
            self.timestamp,
            self.revision.device.as_str(),
            self.revision.sequence,
        )
    }
}

/// A property value with the stamp of the write that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StampedValue {
    pub stamp: Stamp,
    pub value: Value,
}

/// Merge bookkeeping for one object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub entity: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    created: Vec<Stamp>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tombstones: Vec<Stamp>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, Vec<StampedValue>>,
}

/// The visible state of an object after conflict resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedObject {
    pub entity: String,
    pub properties: Properties,
    /// Properties whose live writes were concurrent and needed the resolver.
    pub conflicts: usize,
}

/// Add `stamp` to an antichain, dropping entries it overwrites.
/// Returns false if the stamp is already known or already overwritten.
fn add_to_antichain(chain: &mut Vec<Stamp>, stamp: &Stamp) -> bool {
    if chain
        .iter()
        .any(|s| s.revision == stamp.revision || stamp.happened_before(s))
    {
        return false;
    }
    chain.retain(|s| !s.happened_before(stamp));
    chain.push(stamp.clone());
    true
}

impl ObjectRecord {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            created: Vec::new(),
            tombstones: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Apply one change carrying `stamp`. Returns true if the record changed.
    pub fn apply(&mut self, change: &ObjectChange, stamp: &Stamp) -> bool {
        match change.kind {
            ChangeKind::Insert => {
                if self.is_obsolete(stamp) {
                    return false;
                }
                let mut changed = add_to_antichain(&mut self.created, stamp);
                // an insert carries the full object: older writes of absent properties are gone
                for (name, writes) in self.properties.iter_mut() {
                    if !change.properties.contains_key(name) {
                        let before = writes.len();
                        writes.retain(|w| !w.stamp.happened_before(stamp));
                        changed |= writes.len() != before;
                    }
                }
                self.properties.retain(|_, writes| !writes.is_empty());
                changed |= self.write_properties(&change.properties, stamp);
                changed
            }
            ChangeKind::Update => {
                if self.is_obsolete(stamp) {
                    return false;
                }
                // An update for an object this record has never seen implies it exists.
                let mut changed = false;
                if self.created.is_empty() && self.tombstones.is_empty() {
                    changed |= add_to_antichain(&mut self.created, stamp);
                }
                changed |= self.write_properties(&change.properties, stamp);
                changed
            }
            ChangeKind::Delete => {
                if !add_to_antichain(&mut self.tombstones, stamp) {
                    return false;
                }
                self.created.retain(|s| !s.happened_before(stamp));
                for writes in self.properties.values_mut() {
                    writes.retain(|w| !w.stamp.happened_before(stamp));
                }
                self.properties.retain(|_, writes| !writes.is_empty());
                true
            }
        }
    }

    fn write_properties(&mut self, properties: &Properties, stamp: &Stamp) -> bool {
        let mut changed = false;
        for (name, value) in properties {
            let writes = self.properties.entry(name.clone()).or_default();
            if writes
                .iter()
                .any(|w| w.stamp.revision == stamp.revision || stamp.happened_before(&w.stamp))
            {
                continue;
            }
            writes.retain(|w| !w.stamp.happened_before(stamp));
            writes.push(StampedValue {
                stamp: stamp.clone(),
                value: value.clone(),
            });
            changed = true;
        }
        changed
    }

    /// Writes that a known delete already follows are dead for good.
    fn is_obsolete(&self, stamp: &Stamp) -> bool {
        self.tombstones
            .iter()
            .any(|t| t.revision == stamp.revision || stamp.happened_before(t))
    }

    fn survives_tombstones(&self, stamp: &Stamp) -> bool {
        self.tombstones.iter().all(|t| t.happened_before(stamp))
    }

    pub fn is_visible(&self) -> bool {
        self.created.iter().any(|c| self.survives_tombstones(c))
    }

    pub fn is_deleted(&self) -> bool {
        !self.tombstones.is_empty() && !self.is_visible()
    }

    /// Live writes of one property, in stamp order.
    pub fn live_writes(&self, property: &str) -> Vec<&StampedValue> {
        let mut live: Vec<&StampedValue> = self
            .properties
            .get(property)
            .map(|writes| {
                writes
                    .iter()
                    .filter(|w| self.survives_tombstones(&w.stamp))
                    .collect()
            })
            .unwrap_or_default();
        live.sort_by(|a, b| a.stamp.order_key().cmp(&b.stamp.order_key()));
        live
    }

    /// Compute the visible object, asking `resolver` to pick among
    /// concurrent writes. `None` when the object is deleted.
    pub fn resolve(
        &self,
        global_id: &GlobalId,
        resolver: &dyn ConflictResolver,
    ) -> Result<Option<ResolvedObject>, ResolveError> {
        if !self.is_visible() {
            return Ok(None);
        }

        let mut properties = Properties::new();
        let mut conflicts = 0;
        for name in self.properties.keys() {
            let live = self.live_writes(name);
            let chosen = match live.len() {
                0 => continue,
                1 => live[0],
                n => {
                    conflicts += 1;
                    let candidates: Vec<Candidate<'_>> = live
                        .iter()
                        .map(|w| Candidate {
                            stamp: &w.stamp,
                            value: &w.value,
                        })
                        .collect();
                    let index = resolver
                        .choose(global_id, name, &candidates)
                        .filter(|&i| i < n)
                        .ok_or_else(|| ResolveError::InvalidChoice {
                            resolver: resolver.name().to_string(),
                            global_id: global_id.clone(),
                            property: name.clone(),
                            candidates: n,
                        })?;
                    live[index]
                }
            };
            if !chosen.value.is_null() {
                properties.insert(name.clone(), chosen.value.clone());
            }
        }

        Ok(Some(ResolvedObject {
            entity: self.entity.clone(),
            properties,
            conflicts,
        }))
    }
}

/// Objects of a store keyed by global id.
pub type RecordTable = BTreeMap<GlobalId, ObjectRecord>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::DeviceId;
    use crate::resolver::LastWriterWins;
    use crate::value::properties;

    fn d(id: &str) -> DeviceId {
        DeviceId::from(id)
    }

    fn stamp(device: &str, seq: u64, ts: i64, ctx: &[(&str, u64)]) -> Stamp {
        Stamp::new(
            Revision::new(d(device), seq),
            ts,
            RevisionSet::from_entries(ctx.iter().map(|(id, s)| (d(id), *s))),
        )
    }

    fn gid() -> GlobalId {
        GlobalId::from("x")
    }

    fn visible_number(record: &ObjectRecord) -> Option<i64> {
        record
            .resolve(&gid(), &LastWriterWins)
            .unwrap()
            .and_then(|o| o.properties.get("number").and_then(Value::as_int))
    }

    #[test]
    fn test_causal_update_overwrites() {
        let mut record = ObjectRecord::new("Number");
        let s1 = stamp("a", 1, 10, &[]);
        let s2 = stamp("b", 1, 5, &[("a", 1)]);

        record.apply(&ObjectChange::insert(gid(), "Number", properties([("number", 5i64)])), &s1);
        record.apply(&ObjectChange::update(gid(), "Number", properties([("number", 7i64)])), &s2);

        // b saw a's insert, so b wins despite the earlier timestamp
        assert_eq!(record.live_writes("number").len(), 1);
        assert_eq!(visible_number(&record), Some(7));
    }

    #[test]
    fn test_concurrent_updates_last_writer_wins() {
        let mut record = ObjectRecord::new("Number");
        let base = stamp("a", 1, 1, &[]);
        record.apply(&ObjectChange::insert(gid(), "Number", properties([("number", 5i64)])), &base);

        let from_a = stamp("a", 2, 100, &[("a", 1)]);
        let from_b = stamp("b", 1, 200, &[("a", 1)]);
        record.apply(&ObjectChange::update(gid(), "Number", properties([("number", 7i64)])), &from_a);
        record.apply(&ObjectChange::update(gid(), "Number", properties([("number", 9i64)])), &from_b);

        let resolved = record.resolve(&gid(), &LastWriterWins).unwrap().unwrap();
        assert_eq!(resolved.properties["number"], Value::Int(9));
        assert_eq!(resolved.conflicts, 1);
    }

    #[test]
    fn test_delete_wins_over_concurrent_update() {
        let base = stamp("a", 1, 1, &[]);
        let delete = stamp("a", 2, 100, &[("a", 1)]);
        let update = stamp("b", 1, 500, &[("a", 1)]);

        let insert = ObjectChange::insert(gid(), "Number", properties([("number", 5i64)]));
        let del = ObjectChange::delete(gid(), "Number");
        let upd = ObjectChange::update(gid(), "Number", properties([("number", 9i64)]));

        let mut first = ObjectRecord::new("Number");
        first.apply(&insert, &base);
        first.apply(&del, &delete);
        first.apply(&upd, &update);

        let mut second = ObjectRecord::new("Number");
        second.apply(&insert, &base);
        second.apply(&upd, &update);
        second.apply(&del, &delete);

        assert!(first.is_deleted());
        assert!(second.is_deleted());
        assert_eq!(first.resolve(&gid(), &LastWriterWins).unwrap(), None);
        assert_eq!(second.resolve(&gid(), &LastWriterWins).unwrap(), None);
    }

    #[test]
    fn test_insert_after_delete_resurrects() {
        let mut record = ObjectRecord::new("Number");
        record.apply(
            &ObjectChange::insert(gid(), "Number", properties([("number", 1i64)])),
            &stamp("a", 1, 1, &[]),
        );
        record.apply(&ObjectChange::delete(gid(), "Number"), &stamp("a", 2, 2, &[("a", 1)]));
        assert!(record.is_deleted());

        record.apply(
            &ObjectChange::insert(gid(), "Number", properties([("number", 3i64)])),
            &stamp("b", 1, 3, &[("a", 2)]),
        );
        assert!(record.is_visible());
        assert_eq!(visible_number(&record), Some(3));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut record = ObjectRecord::new("Number");
        let s = stamp("a", 1, 1, &[]);
        let change = ObjectChange::insert(gid(), "Number", properties([("number", 1i64)]));
        assert!(record.apply(&change, &s));
        let snapshot = record.clone();
        assert!(!record.apply(&change, &s));
        assert_eq!(record, snapshot);
    }

    #[test]
    fn test_null_hides_property() {
        let mut record = ObjectRecord::new("Note");
        record.apply(
            &ObjectChange::insert(gid(), "Note", properties([("title", "hi")])),
            &stamp("a", 1, 1, &[]),
        );
        record.apply(
            &ObjectChange::update(gid(), "Note", properties([("title", Value::Null)])),
            &stamp("a", 2, 2, &[("a", 1)]),
        );
        let resolved = record.resolve(&gid(), &LastWriterWins).unwrap().unwrap();
        assert!(resolved.properties.is_empty());
    }

    #[test]
    fn test_tombstone_hides_update_made_before_seeing_delete() {
        let base = stamp("a", 1, 1, &[]);
        let delete = stamp("a", 2, 2, &[("a", 1)]);
        // b wrote before it had merged the delete
        let update = stamp("b", 1, 50, &[("a", 1)]);

        let mut record = ObjectRecord::new("Number");
        record.apply(&ObjectChange::insert(gid(), "Number", properties([("number", 1i64)])), &base);
        record.apply(&ObjectChange::delete(gid(), "Number"), &delete);

        // a baseline folded past the delete keeps this record
        let mut late = record.clone();
        late.apply(&ObjectChange::update(gid(), "Number", properties([("number", 2i64)])), &update);
        assert!(late.is_deleted());
        assert_eq!(late.resolve(&gid(), &LastWriterWins).unwrap(), None);

        // without any record the same update reads as an implicit insert
        let mut fresh = ObjectRecord::new("Number");
        fresh.apply(&ObjectChange::update(gid(), "Number", properties([("number", 2i64)])), &update);
        assert!(fresh.is_visible());
    }
}
