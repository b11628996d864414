//! Merge ordering.
//!
//! Change sets are applied in causal order: a set becomes ready once its
//! device's previous set and every dependency have been applied. Among
//! ready sets the smallest `(timestamp, device, sequence)` goes first, so
//! every replica derives the same sequence from the same input. Sets whose
//! dependencies never become available are deferred to a later merge.

use crate::change::ChangeSet;
use crate::ids::{DeviceId, GlobalId};
use crate::record::{ObjectRecord, RecordTable};
use crate::revision::{Revision, RevisionSet};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

/// Tie-break among change sets that are simultaneously ready.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderKey {
    pub timestamp: i64,
    pub device: DeviceId,
    pub sequence: u64,
}

impl OrderKey {
    pub fn of(change_set: &ChangeSet) -> Self {
        Self {
            timestamp: change_set.timestamp,
            device: change_set.device().clone(),
            sequence: change_set.sequence(),
        }
    }

    fn revision(&self) -> Revision {
        Revision::new(self.device.clone(), self.sequence)
    }
}

/// Result of ordering a batch of downloaded change sets.
#[derive(Clone, Debug, Default)]
pub struct MergePlan {
    /// Change sets in application order.
    pub ordered: Vec<ChangeSet>,
    /// Change sets still waiting for a dependency.
    pub deferred: Vec<ChangeSet>,
    /// Change sets already covered by `applied`, dropped.
    pub already_applied: usize,
    /// `applied` advanced over everything in `ordered`.
    pub applied: RevisionSet,
}

/// Order `candidates` for application on top of `applied`.
pub fn plan_merge(
    applied: &RevisionSet,
    candidates: impl IntoIterator<Item = ChangeSet>,
) -> MergePlan {
    let mut plan = MergePlan {
        applied: applied.clone(),
        ..MergePlan::default()
    };

    let mut pending: BTreeMap<Revision, ChangeSet> = BTreeMap::new();
    for cs in candidates {
        if applied.contains(&cs.revision) {
            plan.already_applied += 1;
        } else {
            pending.insert(cs.revision.clone(), cs);
        }
    }

    let mut queued: BTreeSet<Revision> = BTreeSet::new();
    let mut ready: BinaryHeap<Reverse<OrderKey>> = BinaryHeap::new();

    loop {
        for (revision, cs) in &pending {
            if !queued.contains(revision) && cs.is_ready(&plan.applied) {
                queued.insert(revision.clone());
                ready.push(Reverse(OrderKey::of(cs)));
            }
        }

        let Some(Reverse(next)) = ready.pop() else {
            break;
        };
        if let Some(cs) = pending.remove(&next.revision()) {
            plan.applied.set(next.device.clone(), next.sequence);
            plan.ordered.push(cs);
        }
    }

    plan.deferred = pending.into_values().collect();
    plan
}

/// Apply every change of `change_set` to `table`, returning the ids of the
/// records that changed.
pub fn apply_change_set(table: &mut RecordTable, change_set: &ChangeSet) -> BTreeSet<GlobalId> {
    let stamp = change_set.stamp();
    let mut touched = BTreeSet::new();
    for change in &change_set.changes {
        let record = table
            .entry(change.global_id.clone())
            .or_insert_with(|| ObjectRecord::new(change.entity.clone()));
        if record.apply(change, &stamp) {
            touched.insert(change.global_id.clone());
        }
    }
    touched
}
