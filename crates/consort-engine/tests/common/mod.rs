#![allow(dead_code)]

use consort_cloud::MemoryCloudFileSystem;
use consort_core::{properties, GlobalId};
use consort_engine::{SyncConfig, SyncConfigBuilder, SyncSession};
use consort_store::{LocalSave, MemoryLocalStore};
use std::sync::Arc;

pub fn config(ensemble: &str) -> SyncConfig {
    SyncConfigBuilder::new()
        .ensemble_id(ensemble)
        .max_retries(2)
        .retry_delays(1, 5)
        .download_concurrency(4)
        .rebase_min_change_sets(1)
        .build()
}

/// One simulated device: its own store and its own handle on the shared cloud.
pub struct Device {
    pub store: MemoryLocalStore,
    pub cloud: MemoryCloudFileSystem,
    pub session: SyncSession,
}

impl Device {
    pub async fn open(cloud: &MemoryCloudFileSystem, ensemble: &str) -> Self {
        Self::with_store(cloud, ensemble, MemoryLocalStore::new()).await
    }

    pub async fn with_store(cloud: &MemoryCloudFileSystem, ensemble: &str, store: MemoryLocalStore) -> Self {
        let cloud = cloud.connect();
        let session = SyncSession::open(
            config(ensemble),
            Arc::new(store.clone()),
            Arc::new(cloud.clone()),
        )
        .await
        .unwrap();
        Self {
            store,
            cloud,
            session,
        }
    }

    /// A fresh session over the same store and cloud handle, as after a restart.
    pub async fn reopen(&self) -> SyncSession {
        SyncSession::open(
            self.session.config().clone(),
            Arc::new(self.store.clone()),
            Arc::new(self.cloud.clone()),
        )
        .await
        .unwrap()
    }

    pub fn insert(&self, id: &str, number: i64, at: i64) {
        self.store
            .save(
                LocalSave::new()
                    .put(GlobalId::new(id), "Number", properties([("number", number)]))
                    .at(at),
            )
            .unwrap();
    }

    pub fn set(&self, id: &str, number: i64, at: i64) {
        self.store
            .save(
                LocalSave::new()
                    .patch(GlobalId::new(id), properties([("number", number)]))
                    .at(at),
            )
            .unwrap();
    }

    pub fn delete(&self, id: &str, at: i64) {
        self.store
            .save(LocalSave::new().delete(GlobalId::new(id)).at(at))
            .unwrap();
    }

    pub fn number(&self, id: &str) -> Option<i64> {
        self.store
            .get(&GlobalId::new(id))
            .and_then(|o| o.get("number").and_then(|v| v.as_int()))
    }
}

/// Change-set files currently in the cloud.
pub fn change_set_files(cloud: &MemoryCloudFileSystem) -> Vec<String> {
    cloud
        .paths()
        .into_iter()
        .filter(|p| p.contains("/changesets/"))
        .collect()
}
