//! In-memory local store for tests and simulation.

use crate::data::StoreData;
use crate::error::{Result, StoreError};
use crate::save::{LocalSave, PendingSaves, SaveNotification, StoredObject};
use crate::state::SyncState;
use crate::store::{LocalStore, Transaction};
use async_trait::async_trait;
use consort_core::GlobalId;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Clones share the same contents, so a "reopened" store is just a clone.
#[derive(Clone, Default)]
pub struct MemoryLocalStore {
    data: Arc<RwLock<StoreData>>,
    failing_commits: Arc<AtomicUsize>,
    commits: Arc<AtomicUsize>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an application save.
    pub fn save(&self, save: LocalSave) -> Result<SaveNotification> {
        self.data.write().save(save)
    }

    pub fn get(&self, global_id: &GlobalId) -> Option<StoredObject> {
        self.data.read().objects.get(global_id).cloned()
    }

    pub fn objects(&self) -> Vec<StoredObject> {
        self.data.read().objects.values().cloned().collect()
    }

    pub fn sync_state(&self) -> Option<SyncState> {
        self.data.read().sync_state.clone()
    }

    /// Make the next `count` commits fail without applying anything, as if
    /// the process died before the transaction reached disk.
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn fetch_all(&self) -> Result<Vec<StoredObject>> {
        Ok(self.objects())
    }

    async fn fetch(&self, global_id: &GlobalId) -> Result<Option<StoredObject>> {
        Ok(self.get(global_id))
    }

    async fn pending_saves(&self) -> Result<PendingSaves> {
        Ok(self.data.read().pending())
    }

    async fn load_sync_state(&self) -> Result<Option<SyncState>> {
        Ok(self.sync_state())
    }

    async fn commit(&self, transaction: Transaction) -> Result<()> {
        let failing = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StoreError::CommitFailed("injected commit failure".to_string()));
        }

        self.data.write().apply(transaction)?;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::save::SavedObject;
    use consort_core::properties;

    fn gid(s: &str) -> GlobalId {
        GlobalId::new(s)
    }

    #[tokio::test]
    async fn test_save_reports_insert_then_update() {
        let store = MemoryLocalStore::new();
        store
            .save(LocalSave::new().put(gid("n"), "Number", properties([("number", 1i64)])))
            .unwrap();
        let second = store
            .save(LocalSave::new().patch(gid("n"), properties([("number", 2i64)])))
            .unwrap();

        assert!(matches!(second.objects[0], SavedObject::Updated { .. }));
        let pending = store.pending_saves().await.unwrap();
        assert_eq!(pending.cursor, 2);
        assert_eq!(pending.saves.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_save_changes_nothing() {
        let store = MemoryLocalStore::new();
        let result = store.save(
            LocalSave::new()
                .put(gid("a"), "Number", properties([("number", 1i64)]))
                .delete(gid("missing")),
        );

        assert!(matches!(result, Err(StoreError::UnknownObject(_))));
        assert!(store.objects().is_empty());
        assert!(store.pending_saves().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_cursor_rejects_commit() {
        let store = MemoryLocalStore::new();
        store
            .save(LocalSave::new().put(gid("a"), "Number", properties([("number", 1i64)])))
            .unwrap();

        let tx = Transaction::new()
            .delete(gid("a"))
            .expect_save_cursor(0);
        let err = store.commit(tx).await.unwrap_err();
        assert!(matches!(err, StoreError::SaveConflict { expected: 0, actual: 1 }));
        assert!(store.get(&gid("a")).is_some());
    }

    #[tokio::test]
    async fn test_injected_failure_is_all_or_nothing() {
        let store = MemoryLocalStore::new();
        store.fail_next_commits(1);

        let tx = Transaction::new()
            .put(StoredObject::new(gid("a"), "Number", properties([("number", 1i64)])))
            .sync_state(SyncState::default());
        assert!(store.commit(tx.clone()).await.is_err());
        assert!(store.get(&gid("a")).is_none());
        assert!(store.sync_state().is_none());

        store.commit(tx).await.unwrap();
        assert!(store.get(&gid("a")).is_some());
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn test_clones_share_contents() {
        let store = MemoryLocalStore::new();
        let reopened = store.clone();
        store
            .save(LocalSave::new().put(gid("a"), "Number", properties([("number", 1i64)])))
            .unwrap();

        let fetched = tokio_test::block_on(reopened.fetch(&gid("a"))).unwrap();
        assert_eq!(fetched.and_then(|o| o.get("number").cloned()), Some(1i64.into()));
    }

    #[tokio::test]
    async fn test_acknowledge_consumes_saves() {
        let store = MemoryLocalStore::new();
        for i in 0..3 {
            store
                .save(LocalSave::new().put(gid("a"), "Number", properties([("number", i as i64)])))
                .unwrap();
        }

        store
            .commit(Transaction::new().acknowledge_saves_through(2))
            .await
            .unwrap();
        let pending = store.pending_saves().await.unwrap();
        assert_eq!(pending.saves.len(), 1);
        assert_eq!(pending.saves[0].cursor, 3);
    }
}
