//! Joining and leaving an ensemble.
//!
//! Leeching is destructive when the ensemble already has a baseline: the
//! local objects are replaced by the baseline's. Saves the application made
//! before leeching and that were never recorded are dropped.

use crate::context::SyncContext;
use crate::error::{Result, SaveRace, SyncError};
use crate::event::{DeleechReason, SyncEvent};
use consort_cloud::{BaselineEntry, DeviceRegistration};
use consort_core::{now_millis, Baseline, ContentHash, DeviceId};
use consort_store::{LeechState, StoredObject, SyncState, Transaction};
use tracing::{debug, info, warn};

/// What a leech did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeechOutcome {
    /// The store was already a member; nothing happened.
    AlreadyLeeched,
    /// No baseline existed, so the local objects became the ensemble's origin.
    Created { device: DeviceId, baseline: ContentHash },
    /// The local objects were replaced by an existing baseline.
    Joined { device: DeviceId, baseline: ContentHash },
}

pub struct LeechProtocol<'a> {
    ctx: &'a SyncContext,
}

impl<'a> LeechProtocol<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Join the ensemble. On failure `state` is left not leeched.
    pub async fn leech(&self, state: &mut SyncState) -> Result<LeechOutcome> {
        if state.is_leeched() {
            return Ok(LeechOutcome::AlreadyLeeched);
        }

        self.ctx.set_leech_state(LeechState::Leeching);
        match self.join().await {
            Ok((joined, outcome)) => {
                *state = joined;
                self.ctx.observe(state);
                if let Some(device) = state.device.clone() {
                    info!(%device, ensemble = %self.ctx.config.ensemble_id, "leeched");
                    self.ctx.emit(SyncEvent::Leeched { device });
                }
                Ok(outcome)
            }
            Err(e) => {
                state.leech_state = LeechState::NotLeeched;
                self.ctx.observe(state);
                Err(match e {
                    SyncError::Cancelled => e,
                    e => SyncError::Leech(Box::new(e)),
                })
            }
        }
    }

    async fn join(&self) -> Result<(SyncState, LeechOutcome)> {
        let ctx = self.ctx;
        let pending = ctx.store.pending_saves().await?;
        let device = DeviceId::generate();
        let identity_token = ctx.remote.cloud().identity_token().await?;
        ctx.checkpoint()?;

        let (baseline, created) = match ctx.remote.baselines().await?.into_iter().next() {
            Some(entry) => (ctx.remote.download_baseline(&entry).await?, false),
            None => self.create_origin(&device).await?,
        };
        ctx.checkpoint()?;

        let objects = baseline.resolve_objects(ctx.resolver.as_ref())?;
        let now = now_millis();
        let state = SyncState {
            leech_state: LeechState::Leeched,
            ensemble_id: Some(ctx.config.ensemble_id.clone()),
            device: Some(device.clone()),
            sequence: 0,
            merge_records: baseline.revisions.clone(),
            records: baseline.records.clone(),
            pending_uploads: Vec::new(),
            baseline: Some(baseline.id),
            identity_token: identity_token.clone(),
            leeched_at: Some(now),
        };

        ctx.remote
            .publish_device(&DeviceRegistration {
                device: device.clone(),
                registered_at: now,
                identity_token,
                merged: baseline.revisions.clone(),
                updated_at: now,
            })
            .await?;

        let mut transaction = Transaction::new()
            .replace_objects()
            .sync_state(state.clone())
            .acknowledge_saves_through(pending.cursor)
            .expect_save_cursor(pending.cursor);
        for (global_id, object) in objects {
            transaction = transaction.put(StoredObject::new(global_id, object.entity, object.properties));
        }

        if let Err(e) = ctx.store.commit(transaction).await {
            if let Err(cleanup) = ctx.remote.remove_device(&device).await {
                warn!(%device, error = %cleanup, "could not remove registration of failed leech");
            }
            return Err(SyncError::from_commit(e, SaveRace::Leech));
        }

        let outcome = if created {
            LeechOutcome::Created {
                device,
                baseline: baseline.id,
            }
        } else {
            LeechOutcome::Joined {
                device,
                baseline: baseline.id,
            }
        };
        Ok((state, outcome))
    }

    /// Upload the local objects as the origin baseline. If another device
    /// raced us and its baseline takes precedence, ours is withdrawn and
    /// theirs adopted.
    async fn create_origin(&self, device: &DeviceId) -> Result<(Baseline, bool)> {
        let ctx = self.ctx;
        let objects = ctx.store.fetch_all().await?;
        let origin = Baseline::origin(
            device.clone(),
            now_millis(),
            objects
                .into_iter()
                .map(|o| (o.global_id, o.entity, o.properties)),
        )?;
        let ours = ctx.remote.upload_baseline(&origin).await?;
        debug!(baseline = %origin.id.short(), "uploaded origin baseline");

        match ctx.remote.baselines().await?.into_iter().next() {
            Some(winner) if winner.id != ours.id => {
                info!(ours = %ours.id.short(), theirs = %winner.id.short(), "adopting concurrent baseline");
                self.withdraw(&ours).await;
                Ok((ctx.remote.download_baseline(&winner).await?, false))
            }
            _ => Ok((origin, true)),
        }
    }

    async fn withdraw(&self, entry: &BaselineEntry) {
        if let Err(e) = self.ctx.remote.delete_baseline(entry).await {
            warn!(path = %entry.path, error = %e, "could not delete superseded baseline");
        }
    }

    /// Leave the ensemble. Local objects are kept; sync metadata is cleared.
    pub async fn deleech(&self, state: &mut SyncState, reason: DeleechReason) -> Result<()> {
        if !state.is_leeched() {
            return Err(SyncError::NotLeeched);
        }

        let device = state.device.clone();
        let cleared = SyncState::default();
        self.ctx
            .store
            .commit(Transaction::new().sync_state(cleared.clone()))
            .await?;
        *state = cleared;
        self.ctx.observe(state);

        if let Some(device) = device {
            if let Err(e) = self.ctx.remote.remove_device(&device).await {
                warn!(%device, error = %e, "could not remove device registration");
            }
            info!(%device, ?reason, "deleeched");
        }
        self.ctx.emit(SyncEvent::Deleeched { reason });
        Ok(())
    }
}
