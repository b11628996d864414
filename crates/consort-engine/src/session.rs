//! The application-facing sync session.

use crate::backoff::RetryPolicy;
use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::event::{DeleechReason, MergeReport, SyncEvent, SyncOperation, SyncTrigger};
use crate::leech::{LeechOutcome, LeechProtocol};
use crate::merge::MergeEngine;
use crate::rebase::{RebaseReport, Rebaser};
use crate::repair::MergeRepair;
use crate::scheduler::{wait_settled, SchedulerStatus, SyncJob, SyncScheduler};
use async_trait::async_trait;
use consort_cloud::CloudFileSystem;
use consort_core::{ConflictResolver, DeviceId, LastWriterWins};
use consort_store::{LeechState, LocalStore, SyncState};
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

struct SessionCore {
    ctx: SyncContext,
    /// Operation lock; whoever holds it is the only writer of sync state.
    state: Mutex<SyncState>,
}

impl SessionCore {
    async fn leech(&self, trigger: Option<SyncTrigger>) -> Result<LeechOutcome> {
        let _active = self.ctx.enter();
        let mut state = self.state.lock().await;
        self.ctx.begin(SyncOperation::Leech, trigger);
        let result = LeechProtocol::new(&self.ctx).leech(&mut state).await;
        self.ctx.finish(SyncOperation::Leech, &result);
        result
    }

    async fn merge(&self, trigger: Option<SyncTrigger>) -> Result<MergeReport> {
        let _active = self.ctx.enter();
        let mut state = self.state.lock().await;
        self.ctx.begin(SyncOperation::Merge, trigger);
        let result = MergeEngine::new(&self.ctx).merge(&mut state).await;
        self.ctx.finish(SyncOperation::Merge, &result);
        self.ctx.observe(&state);
        result
    }
}

#[async_trait]
impl SyncJob for SessionCore {
    async fn run(&self, trigger: SyncTrigger) -> Result<()> {
        if self.ctx.leech_state() == LeechState::Leeched {
            self.merge(Some(trigger)).await.map(|_| ())
        } else {
            self.leech(Some(trigger)).await.map(|_| ())
        }
    }
}

/// Keeps one local store in sync with an ensemble.
///
/// # Example
///
/// ```rust
/// use consort_cloud::MemoryCloudFileSystem;
/// use consort_core::{properties, GlobalId};
/// use consort_engine::{SyncConfig, SyncSession};
/// use consort_store::{LocalSave, MemoryLocalStore};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let cloud = MemoryCloudFileSystem::new();
/// let store = MemoryLocalStore::new();
/// let session = SyncSession::open(
///     SyncConfig::new("numbers"),
///     Arc::new(store.clone()),
///     Arc::new(cloud.clone()),
/// )
/// .await
/// .unwrap();
///
/// session.leech().await.unwrap();
/// store
///     .save(LocalSave::new().put(GlobalId::new("n"), "Number", properties([("number", 5i64)])))
///     .unwrap();
/// let report = session.merge().await.unwrap();
/// assert_eq!(report.uploaded, 1);
/// # });
/// ```
pub struct SyncSession {
    core: Arc<SessionCore>,
    scheduler: SyncMutex<Option<Arc<SyncScheduler>>>,
}

impl SyncSession {
    /// Open a session resolving conflicts with [`LastWriterWins`].
    pub async fn open(
        config: SyncConfig,
        store: Arc<dyn LocalStore>,
        cloud: Arc<dyn CloudFileSystem>,
    ) -> Result<Self> {
        Self::open_with_resolver(config, store, cloud, Arc::new(LastWriterWins)).await
    }

    pub async fn open_with_resolver(
        config: SyncConfig,
        store: Arc<dyn LocalStore>,
        cloud: Arc<dyn CloudFileSystem>,
        resolver: Arc<dyn ConflictResolver>,
    ) -> Result<Self> {
        let mut state = store.load_sync_state().await?.unwrap_or_default();
        if state.leech_state == LeechState::Leeching {
            state.leech_state = LeechState::NotLeeched;
        }

        let ctx = SyncContext::new(config, store, cloud, resolver);
        ctx.observe(&state);
        debug!(
            ensemble = %ctx.config().ensemble_id,
            leech_state = ?state.leech_state,
            "opened sync session"
        );

        Ok(Self {
            core: Arc::new(SessionCore {
                ctx,
                state: Mutex::new(state),
            }),
            scheduler: SyncMutex::new(None),
        })
    }

    /// Start the background scheduler. Calling it again has no effect.
    pub fn start(&self) {
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_none() {
            let policy = RetryPolicy::from_config(self.core.ctx.config());
            *scheduler = Some(Arc::new(SyncScheduler::spawn(self.core.clone(), policy)));
            info!(ensemble = %self.core.ctx.config().ensemble_id, "sync scheduler started");
        }
    }

    /// Stop the scheduler after its current run.
    pub async fn close(&self) {
        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown().await;
        }
    }

    /// Join the ensemble. Replaces the local objects when the ensemble
    /// already has a baseline.
    pub async fn leech(&self) -> Result<LeechOutcome> {
        self.core.leech(None).await
    }

    pub async fn merge(&self) -> Result<MergeReport> {
        self.core.merge(None).await
    }

    /// Leave the ensemble, keeping the local objects.
    pub async fn deleech(&self) -> Result<()> {
        let _active = self.core.ctx.enter();
        let mut state = self.core.state.lock().await;
        self.core.ctx.begin(SyncOperation::Deleech, None);
        let result = LeechProtocol::new(&self.core.ctx)
            .deleech(&mut state, DeleechReason::Requested)
            .await;
        self.core.ctx.finish(SyncOperation::Deleech, &result);
        result
    }

    /// Record pending local saves as change sets without touching the cloud.
    pub async fn record_local_saves(&self) -> Result<usize> {
        let _active = self.core.ctx.enter();
        let mut state = self.core.state.lock().await;
        self.core.ctx.begin(SyncOperation::RecordLocalSaves, None);
        let result = MergeEngine::new(&self.core.ctx)
            .record_local_saves(&mut state)
            .await
            .map(|recorded| recorded.change_sets);
        self.core.ctx.finish(SyncOperation::RecordLocalSaves, &result);
        result
    }

    /// Fold change sets every device has merged into a new baseline.
    pub async fn rebase(&self) -> Result<RebaseReport> {
        let _active = self.core.ctx.enter();
        let mut state = self.core.state.lock().await;
        self.core.ctx.begin(SyncOperation::Rebase, None);
        let result = Rebaser::new(&self.core.ctx).rebase(&mut state).await;
        self.core.ctx.finish(SyncOperation::Rebase, &result);
        result
    }

    /// Ask the scheduler for a run. Fails if it was never started or is closed.
    pub fn trigger(&self, trigger: SyncTrigger) -> Result<()> {
        let scheduler = self.scheduler.lock().clone();
        match scheduler {
            Some(scheduler) => scheduler.trigger(trigger).map(|_| ()),
            None => Err(SyncError::SchedulerStopped),
        }
    }

    /// Resolve once the scheduler has nothing running or requested.
    pub async fn wait_idle(&self) -> SchedulerStatus {
        let watch = self.scheduler.lock().as_ref().map(|s| s.watch());
        match watch {
            Some(watch) => wait_settled(watch).await,
            None => SchedulerStatus::Idle,
        }
    }

    /// Cancel the running operation, and any waiting for it, at their next
    /// transport step. A local commit already under way still completes.
    /// Operations started after all of those have returned are unaffected.
    pub fn cancel(&self) {
        self.core.ctx.cancel();
    }

    /// Install or remove the hook that sees every merge before it is
    /// committed.
    pub fn set_merge_repair(&self, repair: Option<Arc<dyn MergeRepair>>) {
        self.core.ctx.set_repair(repair);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.core.ctx.subscribe()
    }

    pub fn status(&self) -> SchedulerStatus {
        self.scheduler
            .lock()
            .as_ref()
            .map(|s| s.status())
            .unwrap_or(SchedulerStatus::Idle)
    }

    pub fn leech_state(&self) -> LeechState {
        self.core.ctx.leech_state()
    }

    pub fn is_leeched(&self) -> bool {
        self.leech_state() == LeechState::Leeched
    }

    pub fn device_id(&self) -> Option<DeviceId> {
        self.core.ctx.device_id()
    }

    pub fn config(&self) -> &SyncConfig {
        self.core.ctx.config()
    }
}
