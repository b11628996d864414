//! The local store seam.
//!
//! The engine never writes objects one at a time: every change it makes,
//! object writes and sync metadata alike, goes through one [`Transaction`]
//! that the store applies atomically or not at all.

use crate::error::Result;
use crate::save::{PendingSaves, StoredObject};
use crate::state::SyncState;
use async_trait::async_trait;
use consort_core::GlobalId;

/// A set of writes applied atomically by [`LocalStore::commit`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transaction {
    /// Drop every object not written by this transaction.
    pub replace_objects: bool,
    pub puts: Vec<StoredObject>,
    pub deletes: Vec<GlobalId>,
    pub sync_state: Option<SyncState>,
    /// Saves up to and including this cursor are consumed.
    pub acknowledge_saves_through: Option<u64>,
    /// Reject the commit if the application saved after this cursor.
    pub expected_save_cursor: Option<u64>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, object: StoredObject) -> Self {
        self.puts.push(object);
        self
    }

    pub fn delete(mut self, global_id: GlobalId) -> Self {
        self.deletes.push(global_id);
        self
    }

    pub fn replace_objects(mut self) -> Self {
        self.replace_objects = true;
        self
    }

    pub fn sync_state(mut self, state: SyncState) -> Self {
        self.sync_state = Some(state);
        self
    }

    pub fn acknowledge_saves_through(mut self, cursor: u64) -> Self {
        self.acknowledge_saves_through = Some(cursor);
        self
    }

    pub fn expect_save_cursor(mut self, cursor: u64) -> Self {
        self.expected_save_cursor = Some(cursor);
        self
    }

    pub fn writes_objects(&self) -> bool {
        self.replace_objects || !self.puts.is_empty() || !self.deletes.is_empty()
    }
}

/// Persistent keyed-object store with transactional saves.
#[async_trait]
pub trait LocalStore: Send + Sync + 'static {
    /// Every object currently stored.
    async fn fetch_all(&self) -> Result<Vec<StoredObject>>;

    async fn fetch(&self, global_id: &GlobalId) -> Result<Option<StoredObject>>;

    /// Saves the engine has not acknowledged yet.
    async fn pending_saves(&self) -> Result<PendingSaves>;

    async fn load_sync_state(&self) -> Result<Option<SyncState>>;

    /// Apply `transaction` atomically.
    async fn commit(&self, transaction: Transaction) -> Result<()>;
}
