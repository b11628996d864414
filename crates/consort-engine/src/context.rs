//! Collaborators and shared switches of one session.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::event::{SyncEvent, SyncOperation, SyncTrigger};
use crate::repair::MergeRepair;
use consort_cloud::{CloudError, CloudFileSystem, DeviceRegistration, RemoteEnsemble, RemoteError};
use consort_core::{now_millis, ChangeSet, ConflictResolver, DeviceId, RevisionSet};
use consort_store::{LeechState, LocalStore, SyncState};
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Everything the leech, merge and rebase protocols work with.
pub struct SyncContext {
    pub(crate) config: SyncConfig,
    pub(crate) store: Arc<dyn LocalStore>,
    pub(crate) remote: RemoteEnsemble,
    pub(crate) resolver: Arc<dyn ConflictResolver>,
    events: broadcast::Sender<SyncEvent>,
    operations: Mutex<Operations>,
    repair: RwLock<Option<Arc<dyn MergeRepair>>>,
    observed: RwLock<(LeechState, Option<DeviceId>)>,
}

/// Operations running or waiting for the operation lock.
#[derive(Default)]
struct Operations {
    active: usize,
    cancelled: bool,
}

/// Marks an operation as active from before it waits for the operation lock
/// until it returns. A cancel lasts until the last active operation ends.
pub(crate) struct ActiveOperation<'a> {
    ctx: &'a SyncContext,
}

impl Drop for ActiveOperation<'_> {
    fn drop(&mut self) {
        let mut operations = self.ctx.operations.lock();
        operations.active = operations.active.saturating_sub(1);
        if operations.active == 0 {
            operations.cancelled = false;
        }
    }
}

/// Change sets fetched by one download pass.
#[derive(Debug, Default)]
pub(crate) struct Downloaded {
    pub change_sets: Vec<ChangeSet>,
    /// Files that exist but could not be decoded.
    pub unreadable: usize,
}

impl SyncContext {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn LocalStore>,
        cloud: Arc<dyn CloudFileSystem>,
        resolver: Arc<dyn ConflictResolver>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let remote = RemoteEnsemble::new(cloud, config.ensemble_id.clone());
        Self {
            config,
            store,
            remote,
            resolver,
            events,
            operations: Mutex::new(Operations::default()),
            repair: RwLock::new(None),
            observed: RwLock::new((LeechState::NotLeeched, None)),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn remote(&self) -> &RemoteEnsemble {
        &self.remote
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Cancel every operation that is running or waiting for the operation
    /// lock. Does nothing while the session is idle.
    pub fn cancel(&self) {
        let mut operations = self.operations.lock();
        if operations.active > 0 {
            operations.cancelled = true;
        }
    }

    pub(crate) fn enter(&self) -> ActiveOperation<'_> {
        self.operations.lock().active += 1;
        ActiveOperation { ctx: self }
    }

    /// Fail with `Cancelled` if [`cancel`](Self::cancel) was called while
    /// the current operation was active.
    pub(crate) fn checkpoint(&self) -> Result<()> {
        if self.operations.lock().cancelled {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn set_repair(&self, repair: Option<Arc<dyn MergeRepair>>) {
        *self.repair.write() = repair;
    }

    pub(crate) fn repair(&self) -> Option<Arc<dyn MergeRepair>> {
        self.repair.read().clone()
    }

    pub(crate) fn begin(&self, operation: SyncOperation, trigger: Option<SyncTrigger>) {
        debug!(%operation, ?trigger, "sync operation started");
        self.emit(SyncEvent::SyncStarted { operation, trigger });
    }

    pub(crate) fn finish<T>(&self, operation: SyncOperation, result: &Result<T>) {
        let result = match result {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(%operation, error = %e, "sync operation failed");
                Err(e.to_string())
            }
        };
        self.emit(SyncEvent::SyncFinished { operation, result });
    }

    pub(crate) fn observe(&self, state: &SyncState) {
        *self.observed.write() = (state.leech_state, state.device.clone());
    }

    pub(crate) fn set_leech_state(&self, leech_state: LeechState) {
        self.observed.write().0 = leech_state;
    }

    pub fn leech_state(&self) -> LeechState {
        self.observed.read().0
    }

    pub fn device_id(&self) -> Option<DeviceId> {
        self.observed.read().1.clone()
    }

    /// Download the given change sets, at most `download_concurrency` at a
    /// time. Files that vanished since they were listed are skipped, and so
    /// are files that cannot be decoded; those are counted.
    pub(crate) async fn download(&self, wanted: Vec<(DeviceId, u64)>) -> Result<Downloaded> {
        let remote = &self.remote;
        let results: Vec<_> = stream::iter(wanted)
            .map(|(device, sequence)| async move {
                let result = remote.download_change_set(&device, sequence).await;
                (device, sequence, result)
            })
            .buffer_unordered(self.config.download_concurrency.max(1))
            .collect()
            .await;

        let mut downloaded = Downloaded {
            change_sets: Vec::with_capacity(results.len()),
            unreadable: 0,
        };
        for (device, sequence, result) in results {
            match result {
                Ok(change_set) => downloaded.change_sets.push(change_set),
                Err(RemoteError::Cloud(CloudError::NotFound(_))) => {
                    debug!(%device, sequence, "change set vanished before download");
                }
                Err(RemoteError::Codec(e)) => {
                    warn!(%device, sequence, error = %e, "skipping unreadable change set");
                    downloaded.unreadable += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(downloaded)
    }

    /// Write the device registration with the merge progress of `state`.
    /// Change sets not yet uploaded do not count as merged.
    pub(crate) async fn publish_progress(&self, state: &SyncState) -> Result<()> {
        let Some(device) = state.device.clone() else {
            return Err(SyncError::NotLeeched);
        };
        let now = now_millis();
        let registration = DeviceRegistration {
            device,
            registered_at: state.leeched_at.unwrap_or(now),
            identity_token: state.identity_token.clone(),
            merged: published_progress(state),
            updated_at: now,
        };
        self.remote.publish_device(&registration).await?;
        Ok(())
    }
}

pub(crate) fn published_progress(state: &SyncState) -> RevisionSet {
    let mut merged = state.applied();
    if let (Some(device), Some(first)) = (&state.device, state.pending_uploads.first()) {
        merged.set(device.clone(), first.sequence().saturating_sub(1));
    }
    merged
}
