//! In-memory cloud file area for testing and simulation.
//!
//! Handles created with [`MemoryCloudFileSystem::connect`] share one backing
//! area but fail independently, so one device can go offline while the
//! others keep syncing. The backing can also hold back new files to mimic
//! a service whose listings lag behind uploads.

use crate::error::CloudError;
use crate::fs::{is_under, CloudFileSystem};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Backing {
    files: BTreeMap<String, Vec<u8>>,
    held: BTreeSet<String>,
    hold_new_files: bool,
    identity: Option<String>,
}

#[derive(Default)]
struct HandleState {
    offline: AtomicBool,
    failures: AtomicUsize,
    puts: AtomicUsize,
    latency: RwLock<Option<Duration>>,
}

#[derive(Clone, Default)]
pub struct MemoryCloudFileSystem {
    backing: Arc<RwLock<Backing>>,
    handle: Arc<HandleState>,
}

impl MemoryCloudFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: impl Into<String>) -> Self {
        let fs = Self::new();
        fs.set_identity(Some(identity.into()));
        fs
    }

    /// A new handle on the same backing area with its own failure switches.
    pub fn connect(&self) -> Self {
        Self {
            backing: self.backing.clone(),
            handle: Arc::new(HandleState::default()),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.handle.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `count` operations of this handle.
    pub fn fail_next(&self, count: usize) {
        self.handle.failures.store(count, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.handle.latency.write() = latency;
    }

    /// Switch the signed-in account for every handle.
    pub fn set_identity(&self, identity: Option<String>) {
        self.backing.write().identity = identity;
    }

    /// While on, files written by any handle stay invisible until
    /// [`reveal_held`](Self::reveal_held) is called.
    pub fn hold_new_files(&self, hold: bool) {
        self.backing.write().hold_new_files = hold;
    }

    pub fn reveal_held(&self) {
        self.backing.write().held.clear();
    }

    /// Every stored path, held ones included.
    pub fn paths(&self) -> Vec<String> {
        self.backing.read().files.keys().cloned().collect()
    }

    /// Number of successful puts made through this handle.
    pub fn put_count(&self) -> usize {
        self.handle.puts.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<(), CloudError> {
        let latency = *self.handle.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.handle.offline.load(Ordering::SeqCst) {
            return Err(CloudError::Unavailable("offline".to_string()));
        }
        let injected = self
            .handle
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(CloudError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CloudFileSystem for MemoryCloudFileSystem {
    async fn identity_token(&self) -> Result<Option<String>, CloudError> {
        self.enter().await?;
        Ok(self.backing.read().identity.clone())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, CloudError> {
        self.enter().await?;
        let backing = self.backing.read();
        Ok(backing
            .files
            .keys()
            .filter(|path| is_under(path, prefix) && !backing.held.contains(*path))
            .cloned()
            .collect())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, CloudError> {
        self.enter().await?;
        let backing = self.backing.read();
        match backing.files.get(path) {
            Some(data) if !backing.held.contains(path) => Ok(data.clone()),
            _ => Err(CloudError::NotFound(path.to_string())),
        }
    }

    async fn put(&self, path: &str, data: Vec<u8>) -> Result<(), CloudError> {
        self.enter().await?;
        let mut backing = self.backing.write();
        if backing.hold_new_files {
            backing.held.insert(path.to_string());
        }
        backing.files.insert(path.to_string(), data);
        self.handle.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), CloudError> {
        self.enter().await?;
        let mut backing = self.backing.write();
        backing.files.remove(path);
        backing.held.remove(path);
        Ok(())
    }
}
