//! A local store persisted as a single JSON file.
//!
//! Every save and commit rewrites the whole file through a temporary file
//! and a rename, so a crash leaves either the old or the new contents.

use crate::data::StoreData;
use crate::error::Result;
use crate::save::{LocalSave, PendingSaves, SaveNotification, StoredObject};
use crate::state::SyncState;
use crate::store::{LocalStore, Transaction};
use async_trait::async_trait;
use consort_core::GlobalId;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

pub struct FileLocalStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl FileLocalStore {
    /// Open the store at `path`, creating an empty one if the file is absent.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "opened file store");

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply an application save and persist it.
    pub async fn save(&self, save: LocalSave) -> Result<SaveNotification> {
        let mut data = self.data.lock().await;
        let mut next = data.clone();
        let notification = next.save(save)?;
        self.persist(&next).await?;
        *data = next;
        Ok(notification)
    }

    pub async fn objects(&self) -> Vec<StoredObject> {
        self.data.lock().await.objects.values().cloned().collect()
    }

    async fn persist(&self, data: &StoreData) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(data)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl LocalStore for FileLocalStore {
    async fn fetch_all(&self) -> Result<Vec<StoredObject>> {
        Ok(self.objects().await)
    }

    async fn fetch(&self, global_id: &GlobalId) -> Result<Option<StoredObject>> {
        Ok(self.data.lock().await.objects.get(global_id).cloned())
    }

    async fn pending_saves(&self) -> Result<PendingSaves> {
        Ok(self.data.lock().await.pending())
    }

    async fn load_sync_state(&self) -> Result<Option<SyncState>> {
        Ok(self.data.lock().await.sync_state.clone())
    }

    async fn commit(&self, transaction: Transaction) -> Result<()> {
        let mut data = self.data.lock().await;
        let mut next = data.clone();
        next.apply(transaction)?;
        self.persist(&next).await?;
        *data = next;
        Ok(())
    }
}
