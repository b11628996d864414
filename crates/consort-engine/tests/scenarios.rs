//! Multi-device sync scenarios over the in-memory store and cloud.

mod common;

use common::{change_set_files, Device};
use consort_cloud::MemoryCloudFileSystem;
use consort_core::properties;
use consort_engine::{
    LeechOutcome, MergeRepair, MergedChanges, RepairDecision, RepairWrite, SyncError,
};
use consort_store::{LocalStore, StoreError, StoredObject};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_test::assert_ok;

#[tokio::test]
async fn test_concurrent_edits_converge_on_latest() {
    let cloud = MemoryCloudFileSystem::new();
    let a = Device::open(&cloud, "numbers").await;
    let b = Device::open(&cloud, "numbers").await;

    assert!(matches!(assert_ok!(a.session.leech().await), LeechOutcome::Created { .. }));
    assert!(matches!(assert_ok!(b.session.leech().await), LeechOutcome::Joined { .. }));

    b.insert("n", 5, 1_000);
    let report = assert_ok!(b.session.merge().await);
    assert_eq!(report.uploaded, 1);

    let report = assert_ok!(a.session.merge().await);
    assert_eq!(report.applied, 1);
    assert_eq!(a.number("n"), Some(5));

    a.set("n", 7, 2_000);
    b.set("n", 9, 3_000);

    assert_ok!(a.session.merge().await);
    assert_eq!(a.number("n"), Some(7));

    let report = assert_ok!(b.session.merge().await);
    assert_eq!(report.applied, 1);
    assert_eq!(report.conflicts_resolved, 1);
    assert_eq!(b.number("n"), Some(9));

    assert_ok!(a.session.merge().await);
    assert_eq!(a.number("n"), Some(9));
    assert_eq!(a.store.objects(), b.store.objects());
}

#[tokio::test]
async fn test_earlier_concurrent_write_loses_either_way() {
    let cloud = MemoryCloudFileSystem::new();
    let a = Device::open(&cloud, "numbers").await;
    let b = Device::open(&cloud, "numbers").await;
    assert_ok!(a.session.leech().await);
    assert_ok!(b.session.leech().await);

    a.insert("n", 1, 100);
    assert_ok!(a.session.merge().await);
    assert_ok!(b.session.merge().await);

    // the later write is merged first this time
    a.set("n", 20, 500);
    b.set("n", 10, 400);
    assert_ok!(a.session.merge().await);
    assert_ok!(b.session.merge().await);
    assert_ok!(a.session.merge().await);

    assert_eq!(a.number("n"), Some(20));
    assert_eq!(b.number("n"), Some(20));
}

#[tokio::test]
async fn test_delete_wins_over_concurrent_update() {
    let cloud = MemoryCloudFileSystem::new();
    let a = Device::open(&cloud, "numbers").await;
    let b = Device::open(&cloud, "numbers").await;
    assert_ok!(a.session.leech().await);
    assert_ok!(b.session.leech().await);

    a.insert("x", 1, 100);
    assert_ok!(a.session.merge().await);
    assert_ok!(b.session.merge().await);
    assert_eq!(b.number("x"), Some(1));

    a.delete("x", 200);
    b.set("x", 2, 300);
    assert_ok!(a.session.merge().await);
    assert_ok!(b.session.merge().await);
    assert_ok!(a.session.merge().await);

    assert_eq!(a.number("x"), None);
    assert_eq!(b.number("x"), None);
}

#[tokio::test]
async fn test_merge_is_idempotent() {
    let cloud = MemoryCloudFileSystem::new();
    let a = Device::open(&cloud, "numbers").await;
    let b = Device::open(&cloud, "numbers").await;
    assert_ok!(a.session.leech().await);
    assert_ok!(b.session.leech().await);

    a.insert("n", 1, 100);
    b.insert("m", 2, 100);
    assert_ok!(a.session.merge().await);
    assert_ok!(b.session.merge().await);
    assert_ok!(a.session.merge().await);

    let objects = a.store.objects();
    let commits = a.store.commit_count();
    let report = assert_ok!(a.session.merge().await);
    assert!(report.is_noop());
    assert_eq!(a.store.objects(), objects);
    assert_eq!(a.store.commit_count(), commits);
}

#[tokio::test]
async fn test_new_device_replays_to_same_state() {
    let cloud = MemoryCloudFileSystem::new();
    let a = Device::open(&cloud, "numbers").await;
    assert_ok!(a.session.leech().await);

    a.insert("n", 1, 100);
    a.insert("m", 10, 110);
    assert_ok!(a.session.merge().await);
    a.set("n", 2, 120);
    a.delete("m", 130);
    assert_ok!(a.session.record_local_saves().await);
    a.insert("k", 3, 140);
    a.set("n", 4, 150);
    assert_ok!(a.session.merge().await);

    let c = Device::open(&cloud, "numbers").await;
    assert_ok!(c.session.leech().await);
    let report = assert_ok!(c.session.merge().await);
    assert_eq!(report.applied, 6);
    assert_eq!(c.store.objects(), a.store.objects());
    assert_eq!(c.number("n"), Some(4));
    assert_eq!(c.number("m"), None);
}

#[tokio::test]
async fn test_leech_replaces_local_objects_with_baseline() {
    let cloud = MemoryCloudFileSystem::new();
    let a = Device::open(&cloud, "numbers").await;
    a.insert("seed", 42, 10);
    assert_ok!(a.session.leech().await);

    let b = Device::open(&cloud, "numbers").await;
    b.insert("local-only", 1, 20);
    assert_ok!(b.session.leech().await);

    assert_eq!(b.number("seed"), Some(42));
    assert_eq!(b.number("local-only"), None);
    assert!(b.store.pending_saves().await.unwrap().is_empty());

    // the origin device keeps its own objects
    assert_eq!(a.number("seed"), Some(42));
    assert!(matches!(
        assert_ok!(a.session.leech().await),
        LeechOutcome::AlreadyLeeched
    ));
}

#[tokio::test]
async fn test_leech_fails_cleanly_when_offline() {
    let cloud = MemoryCloudFileSystem::new();
    let a = Device::open(&cloud, "numbers").await;
    a.cloud.set_offline(true);

    let err = a.session.leech().await.unwrap_err();
    assert!(matches!(err, SyncError::Leech(_)));
    assert!(err.is_retryable());
    assert!(!a.session.is_leeched());
    assert!(a.store.sync_state().is_none());

    a.cloud.set_offline(false);
    assert_ok!(a.session.leech().await);
    assert!(a.session.is_leeched());
    assert!(a.session.device_id().is_some());
}

#[tokio::test]
async fn test_merge_requires_leech() {
    let cloud = MemoryCloudFileSystem::new();
    let a = Device::open(&cloud, "numbers").await;
    assert!(matches!(a.session.merge().await, Err(SyncError::NotLeeched)));
}

#[tokio::test]
async fn test_deferred_change_sets_wait_for_dependencies() {
    let cloud = MemoryCloudFileSystem::new();
    let a = Device::open(&cloud, "numbers").await;
    let b = Device::open(&cloud, "numbers").await;
    assert_ok!(a.session.leech().await);
    assert_ok!(b.session.leech().await);

    a.insert("n", 1, 100);
    assert_ok!(a.session.merge().await);

    cloud.hold_new_files(true);
    a.set("n", 2, 200);
    assert_ok!(a.session.merge().await);
    cloud.hold_new_files(false);
    a.set("n", 3, 300);
    assert_ok!(a.session.merge().await);

    let report = assert_ok!(b.session.merge().await);
    assert_eq!(report.applied, 1);
    assert_eq!(report.deferred, 1);
    assert_eq!(b.number("n"), Some(1));

    cloud.reveal_held();
    let report = assert_ok!(b.session.merge().await);
    assert_eq!(report.applied, 2);
    assert_eq!(report.deferred, 0);
    assert_eq!(b.number("n"), Some(3));
}

#[tokio::test]
async fn test_save_during_merge_is_rejected_and_retried() {
    let cloud = MemoryCloudFileSystem::new();
    let a = Device::open(&cloud, "numbers").await;
    let b = Device::open(&cloud, "numbers").await;
    assert_ok!(a.session.leech().await);
    assert_ok!(b.session.leech().await);

    b.insert("n", 5, 100);
    assert_ok!(b.session.merge().await);

    // a slow cloud gives the application time to save mid-merge
    a.cloud.set_latency(Some(std::time::Duration::from_millis(20)));
    let merging = a.session.merge();
    let saving = async {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        a.insert("other", 1, 200);
    };
    let (result, ()) = tokio::join!(merging, saving);
    assert!(matches!(result, Err(SyncError::SaveOccurredDuringMerge)));
    assert_eq!(a.number("n"), None);

    a.cloud.set_latency(None);
    assert_ok!(a.session.merge().await);
    assert_eq!(a.number("n"), Some(5));
    assert_eq!(a.number("other"), Some(1));
}

#[tokio::test]
async fn test_change_set_files_follow_layout() {
    let cloud = MemoryCloudFileSystem::new();
    let a = Device::open(&cloud, "numbers").await;
    assert_ok!(a.session.leech().await);
    a.insert("n", 1, 100);
    a.set("n", 2, 200);
    assert_ok!(a.session.merge().await);

    let device = a.session.device_id().unwrap();
    assert_eq!(
        change_set_files(&cloud),
        vec![
            format!("numbers/changesets/{}/00000000000000000001.json", device),
            format!("numbers/changesets/{}/00000000000000000002.json", device),
        ]
    );
    assert!(cloud
        .paths()
        .contains(&format!("numbers/devices/{}.json", device)));
}

/// Negative numbers are not allowed; merged ones are reset to zero.
struct ClampNegative;

impl MergeRepair for ClampNegative {
    fn before_commit(&self, changes: &MergedChanges) -> RepairDecision {
        let writes: Vec<_> = changes
            .puts
            .iter()
            .filter(|o| o.get("number").and_then(|v| v.as_int()).is_some_and(|n| n < 0))
            .map(|o| {
                RepairWrite::Put(StoredObject::new(
                    o.global_id.clone(),
                    o.entity.clone(),
                    properties([("number", 0i64)]),
                ))
            })
            .collect();
        if writes.is_empty() {
            RepairDecision::Accept
        } else {
            RepairDecision::Amend(writes)
        }
    }
}

struct VetoAll;

impl MergeRepair for VetoAll {
    fn before_commit(&self, _changes: &MergedChanges) -> RepairDecision {
        RepairDecision::Veto
    }
}

#[derive(Default)]
struct RetryFailedCommit {
    failures: AtomicUsize,
}

impl MergeRepair for RetryFailedCommit {
    fn before_commit(&self, _changes: &MergedChanges) -> RepairDecision {
        RepairDecision::Accept
    }

    fn after_failed_commit(&self, _changes: &MergedChanges, _error: &StoreError) -> RepairDecision {
        self.failures.fetch_add(1, Ordering::SeqCst);
        RepairDecision::Accept
    }
}

#[tokio::test]
async fn test_merge_repair_amends_and_replicates() {
    let cloud = MemoryCloudFileSystem::new();
    let a = Device::open(&cloud, "numbers").await;
    let b = Device::open(&cloud, "numbers").await;
    assert_ok!(a.session.leech().await);
    assert_ok!(b.session.leech().await);
    a.session.set_merge_repair(Some(Arc::new(ClampNegative)));

    b.insert("n", -5, 100);
    b.insert("m", 3, 100);
    assert_ok!(b.session.merge().await);

    let report = assert_ok!(a.session.merge().await);
    assert_eq!(report.applied, 2);
    assert_eq!(report.repaired, 1);
    assert_eq!(report.uploaded, 1);
    assert_eq!(a.number("n"), Some(0));
    assert_eq!(a.number("m"), Some(3));

    let report = assert_ok!(b.session.merge().await);
    assert_eq!(report.applied, 1);
    assert_eq!(b.number("n"), Some(0));

    // the repaired state is stable
    let report = assert_ok!(a.session.merge().await);
    assert_eq!(report.repaired, 0);
}

#[tokio::test]
async fn test_merge_repair_veto_commits_nothing() {
    let cloud = MemoryCloudFileSystem::new();
    let a = Device::open(&cloud, "numbers").await;
    let b = Device::open(&cloud, "numbers").await;
    assert_ok!(a.session.leech().await);
    assert_ok!(b.session.leech().await);
    b.insert("n", 5, 100);
    assert_ok!(b.session.merge().await);

    a.session.set_merge_repair(Some(Arc::new(VetoAll)));
    let err = a.session.merge().await.unwrap_err();
    assert!(matches!(err, SyncError::MergeVetoed));
    assert!(!err.is_retryable());
    assert_eq!(a.number("n"), None);

    a.session.set_merge_repair(None);
    let report = assert_ok!(a.session.merge().await);
    assert_eq!(report.applied, 1);
    assert_eq!(a.number("n"), Some(5));
}

#[tokio::test]
async fn test_merge_repair_retries_failed_commit() {
    let cloud = MemoryCloudFileSystem::new();
    let a = Device::open(&cloud, "numbers").await;
    let b = Device::open(&cloud, "numbers").await;
    assert_ok!(a.session.leech().await);
    assert_ok!(b.session.leech().await);
    b.insert("n", 5, 100);
    assert_ok!(b.session.merge().await);

    let repair = Arc::new(RetryFailedCommit::default());
    a.session.set_merge_repair(Some(repair.clone()));
    a.store.fail_next_commits(1);
    let report = assert_ok!(a.session.merge().await);
    assert_eq!(report.applied, 1);
    assert_eq!(repair.failures.load(Ordering::SeqCst), 1);
    assert_eq!(a.number("n"), Some(5));
}
