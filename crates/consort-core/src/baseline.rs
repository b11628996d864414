//! Baselines: the full state every leeching device starts from.
//!
//! A baseline captures the merge records of every object at a causally
//! stable point, together with the revision set it covers. Its id is the
//! hash of its content, and two competing baselines are ordered by
//! `(created_at, id)` so every device picks the same one.

use crate::causal::apply_change_set;
use crate::change::{ChangeSet, ObjectChange};
use crate::hash::{ContentHash, ContentHasher};
use crate::ids::{DeviceId, GlobalId};
use crate::record::{ObjectRecord, RecordTable, ResolvedObject, Stamp};
use crate::resolver::{ConflictResolver, ResolveError};
use crate::revision::{Revision, RevisionSet};
use crate::value::Properties;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while building or checking a baseline.
#[derive(Error, Debug)]
pub enum BaselineError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Format mismatch: expected {expected}, got {actual}")]
    FormatMismatch { expected: u8, actual: u8 },

    #[error("Content hash mismatch: recorded {recorded}, computed {computed}")]
    HashMismatch {
        recorded: ContentHash,
        computed: ContentHash,
    },
}

/// Current baseline format version.
pub const BASELINE_FORMAT: u8 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub format: u8,
    pub id: ContentHash,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub creator: DeviceId,
    /// Change sets folded into this baseline.
    pub revisions: RevisionSet,
    pub records: RecordTable,
}

#[derive(Serialize)]
struct HashedContent<'a> {
    format: u8,
    created_at: i64,
    creator: &'a DeviceId,
    revisions: &'a RevisionSet,
    records: &'a RecordTable,
}

impl Baseline {
    pub fn new(
        creator: DeviceId,
        created_at: i64,
        revisions: RevisionSet,
        records: RecordTable,
    ) -> Result<Self, BaselineError> {
        let id = Self::content_hash(BASELINE_FORMAT, created_at, &creator, &revisions, &records)?;
        Ok(Self {
            format: BASELINE_FORMAT,
            id,
            created_at,
            creator,
            revisions,
            records,
        })
    }

    /// The first baseline of an ensemble, taken from a device's existing
    /// objects. Every write gets the creator's baseline revision so any
    /// later change set overwrites it.
    pub fn origin(
        creator: DeviceId,
        created_at: i64,
        objects: impl IntoIterator<Item = (GlobalId, String, Properties)>,
    ) -> Result<Self, BaselineError> {
        let stamp = Stamp::new(Revision::baseline(creator.clone()), created_at, RevisionSet::new());
        let mut records = RecordTable::new();
        for (global_id, entity, properties) in objects {
            let change = ObjectChange::insert(global_id.clone(), entity.clone(), properties);
            records
                .entry(global_id)
                .or_insert_with(|| ObjectRecord::new(entity))
                .apply(&change, &stamp);
        }
        Self::new(creator, created_at, RevisionSet::new(), records)
    }

    fn content_hash(
        format: u8,
        created_at: i64,
        creator: &DeviceId,
        revisions: &RevisionSet,
        records: &RecordTable,
    ) -> Result<ContentHash, BaselineError> {
        let bytes = serde_json::to_vec(&HashedContent {
            format,
            created_at,
            creator,
            revisions,
            records,
        })
        .map_err(|e| BaselineError::Serialization(e.to_string()))?;

        let mut hasher = ContentHasher::new();
        hasher.update(&bytes);
        Ok(hasher.finalize())
    }

    /// Check the format version and that the content matches the id.
    pub fn verify(&self) -> Result<(), BaselineError> {
        if self.format != BASELINE_FORMAT {
            return Err(BaselineError::FormatMismatch {
                expected: BASELINE_FORMAT,
                actual: self.format,
            });
        }
        let computed = Self::content_hash(
            self.format,
            self.created_at,
            &self.creator,
            &self.revisions,
            &self.records,
        )?;
        if computed != self.id {
            return Err(BaselineError::HashMismatch {
                recorded: self.id,
                computed,
            });
        }
        Ok(())
    }

    /// Ordering used to settle concurrent baseline uploads: smallest wins.
    pub fn precedence(&self) -> (i64, ContentHash) {
        (self.created_at, self.id)
    }

    /// Visible objects of this baseline.
    pub fn resolve_objects(
        &self,
        resolver: &dyn ConflictResolver,
    ) -> Result<Vec<(GlobalId, ResolvedObject)>, ResolveError> {
        let mut objects = Vec::new();
        for (global_id, record) in &self.records {
            if let Some(object) = record.resolve(global_id, resolver)? {
                objects.push((global_id.clone(), object));
            }
        }
        Ok(objects)
    }

    /// Fold `ordered` change sets, all covered by `frontier`, into a new
    /// baseline.
    ///
    /// Records of deleted objects are kept. A change set outside the
    /// frontier may still have been written before its device merged the
    /// delete, and without the tombstone it would read as an insert.
    pub fn fold(
        &self,
        creator: DeviceId,
        created_at: i64,
        ordered: &[ChangeSet],
        frontier: RevisionSet,
    ) -> Result<Baseline, BaselineError> {
        let mut records = self.records.clone();
        for change_set in ordered {
            apply_change_set(&mut records, change_set);
        }
        Baseline::new(creator, created_at, self.revisions.merged_with(&frontier), records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::LastWriterWins;
    use crate::value::{properties, Value};

    fn d(id: &str) -> DeviceId {
        DeviceId::from(id)
    }

    fn origin() -> Baseline {
        Baseline::origin(
            d("a"),
            1_000,
            vec![(
                GlobalId::from("n"),
                "Number".to_string(),
                properties([("number", 5i64)]),
            )],
        )
        .unwrap()
    }

    #[test]
    fn test_origin_resolves_to_input() {
        let baseline = origin();
        baseline.verify().unwrap();
        assert!(baseline.revisions.is_empty());

        let objects = baseline.resolve_objects(&LastWriterWins).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].1.properties["number"], Value::Int(5));
    }

    #[test]
    fn test_tampered_content_fails_verification() {
        let mut baseline = origin();
        baseline.created_at += 1;
        assert!(matches!(
            baseline.verify(),
            Err(BaselineError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_fold_applies_and_keeps_tombstones() {
        let baseline = origin();
        let update = ChangeSet::new(
            Revision::new(d("b"), 1),
            2_000,
            RevisionSet::new(),
            vec![ObjectChange::update(GlobalId::from("n"), "Number", properties([("number", 9i64)]))],
        );
        let insert_other = ChangeSet::new(
            Revision::new(d("b"), 2),
            2_001,
            RevisionSet::from_entries([(d("b"), 1)]),
            vec![ObjectChange::insert(GlobalId::from("tmp"), "Number", properties([("number", 1i64)]))],
        );
        let delete_other = ChangeSet::new(
            Revision::new(d("b"), 3),
            2_002,
            RevisionSet::from_entries([(d("b"), 2)]),
            vec![ObjectChange::delete(GlobalId::from("tmp"), "Number")],
        );
        let frontier = RevisionSet::from_entries([(d("b"), 3)]);
        let folded = baseline
            .fold(d("b"), 3_000, &[update, insert_other, delete_other], frontier.clone())
            .unwrap();

        folded.verify().unwrap();
        assert_eq!(folded.revisions, frontier);
        assert!(folded.records[&GlobalId::from("tmp")].is_deleted());
        let objects = folded.resolve_objects(&LastWriterWins).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].1.properties["number"], Value::Int(9));
        assert!(folded.precedence() > baseline.precedence());
    }
}
