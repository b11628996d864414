//! Application hook between resolving a merge and committing it.
//!
//! Resolution only guarantees that every device ends up with the same
//! objects. Whether those objects still satisfy the application's own rules
//! (a required relation, a unique name) is for the application to judge, and
//! a [`MergeRepair`] gets that chance before the merge reaches the store.
//! Writes it adds are recorded as a new local change set, so every other
//! device receives the repair on its next merge.

use consort_core::GlobalId;
use consort_store::{StoreError, StoredObject};

/// The objects a merge is about to write.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergedChanges {
    pub puts: Vec<StoredObject>,
    pub deletes: Vec<GlobalId>,
}

impl MergedChanges {
    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.deletes.is_empty()
    }

    pub fn put(&self, global_id: &GlobalId) -> Option<&StoredObject> {
        self.puts.iter().find(|o| &o.global_id == global_id)
    }

    pub fn deletes(&self, global_id: &GlobalId) -> bool {
        self.deletes.contains(global_id)
    }
}

/// One write added by a repair.
#[derive(Clone, Debug, PartialEq)]
pub enum RepairWrite {
    /// Store the object with exactly these properties.
    Put(StoredObject),
    Delete(GlobalId),
}

#[derive(Clone, Debug, PartialEq)]
pub enum RepairDecision {
    /// Commit the merge as resolved.
    Accept,
    /// Commit the merge together with these writes.
    Amend(Vec<RepairWrite>),
    /// Abandon the merge. Nothing is committed and the merge fails with
    /// `MergeVetoed`; the same change sets are offered again next time.
    Veto,
}

/// Sees every merge before it is committed.
///
/// Both methods run while the session holds its operation lock, so they
/// must not call back into the session.
pub trait MergeRepair: Send + Sync {
    fn before_commit(&self, changes: &MergedChanges) -> RepairDecision;

    /// Called once when committing the merge failed for a reason other than
    /// a concurrent save. `Accept` or `Amend` retries the commit once.
    fn after_failed_commit(&self, _changes: &MergedChanges, _error: &StoreError) -> RepairDecision {
        RepairDecision::Veto
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consort_core::properties;

    struct AcceptAll;

    impl MergeRepair for AcceptAll {
        fn before_commit(&self, _changes: &MergedChanges) -> RepairDecision {
            RepairDecision::Accept
        }
    }

    #[test]
    fn test_failed_commit_is_vetoed_by_default() {
        let changes = MergedChanges::default();
        let error = StoreError::CommitFailed("disk full".into());
        assert_eq!(AcceptAll.after_failed_commit(&changes, &error), RepairDecision::Veto);
    }

    #[test]
    fn test_merged_changes_lookup() {
        let changes = MergedChanges {
            puts: vec![StoredObject::new(
                GlobalId::new("a"),
                "Number",
                properties([("number", 1i64)]),
            )],
            deletes: vec![GlobalId::new("b")],
        };
        assert!(!changes.is_empty());
        assert_eq!(changes.put(&GlobalId::new("a")).map(|o| o.entity.as_str()), Some("Number"));
        assert!(changes.put(&GlobalId::new("b")).is_none());
        assert!(changes.deletes(&GlobalId::new("b")));
        assert!(MergedChanges::default().is_empty());
    }
}
