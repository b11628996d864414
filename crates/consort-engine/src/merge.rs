//! Recording local saves, uploading them and merging remote change sets.

use crate::context::{Downloaded, SyncContext};
use crate::error::{Result, SaveRace, SyncError};
use crate::event::{DeleechReason, MergeReport, SyncEvent};
use crate::leech::LeechProtocol;
use crate::repair::{MergedChanges, RepairDecision, RepairWrite};
use consort_core::{
    apply_change_set, now_millis, plan_merge, ChangeSet, DeviceId, GlobalId, ObjectChange, Revision,
};
use consort_store::{ChangeSetExtractor, StoreError, StoredObject, SyncState, Transaction};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Local saves turned into change sets by one recording pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Recorded {
    /// Store save cursor the pass read up to.
    pub cursor: u64,
    pub change_sets: usize,
}

pub struct MergeEngine<'a> {
    ctx: &'a SyncContext,
}

impl<'a> MergeEngine<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Turn unacknowledged saves into change sets queued for upload.
    ///
    /// The change sets and the acknowledgement of the saves they came from
    /// are committed together.
    pub async fn record_local_saves(&self, state: &mut SyncState) -> Result<Recorded> {
        let Some(device) = state.device.clone().filter(|_| state.is_leeched()) else {
            return Err(SyncError::NotLeeched);
        };

        let pending = self.ctx.store.pending_saves().await?;
        if pending.is_empty() {
            return Ok(Recorded {
                cursor: pending.cursor,
                change_sets: 0,
            });
        }

        let mut next = state.clone();
        let mut recorded = 0;
        for save in &pending.saves {
            let (changes, errors) = ChangeSetExtractor::extract_lenient(save);
            for error in errors {
                warn!(cursor = save.cursor, error = %error, "object left out of change set");
            }
            if changes.is_empty() {
                continue;
            }

            let sequence = next.sequence + 1;
            let change_set = ChangeSet::new(
                Revision::new(device.clone(), sequence),
                save.timestamp,
                next.applied(),
                changes,
            );
            apply_change_set(&mut next.records, &change_set);
            next.sequence = sequence;
            next.pending_uploads.push(change_set);
            recorded += 1;
        }

        self.ctx
            .store
            .commit(
                Transaction::new()
                    .sync_state(next.clone())
                    .acknowledge_saves_through(pending.cursor),
            )
            .await?;
        *state = next;

        if recorded > 0 {
            debug!(count = recorded, sequence = state.sequence, "recorded local change sets");
            self.ctx.emit(SyncEvent::LocalChangesRecorded { count: recorded });
        }
        Ok(Recorded {
            cursor: pending.cursor,
            change_sets: recorded,
        })
    }

    /// Run one full merge: record, upload, download, apply, commit.
    pub async fn merge(&self, state: &mut SyncState) -> Result<MergeReport> {
        if !state.is_leeched() {
            return Err(SyncError::NotLeeched);
        }
        self.check_identity(state).await?;

        let recorded = self.record_local_saves(state).await?;
        self.ctx.checkpoint()?;

        let mut uploaded = self.upload(state).await?;
        self.ctx.checkpoint()?;

        self.check_baseline(state).await?;
        self.ctx.checkpoint()?;

        let downloaded = self.download(state).await?;
        self.ctx.checkpoint()?;

        let plan = plan_merge(&state.applied(), downloaded.change_sets);
        let mut next = state.clone();
        let mut touched = BTreeSet::new();
        for change_set in &plan.ordered {
            touched.extend(apply_change_set(&mut next.records, change_set));
            let device = change_set.device().clone();
            let merged = next.merge_records.get(&device).max(change_set.sequence());
            next.merge_records.set(device, merged);
        }

        let mut conflicts_resolved = 0;
        let mut repaired = 0;
        if !plan.ordered.is_empty() {
            let (mut changes, conflicts) = self.resolve(&next, &touched)?;
            conflicts_resolved = conflicts;
            let repair = self.ctx.repair();
            if let Some(repair) = &repair {
                match repair.before_commit(&changes) {
                    RepairDecision::Accept => {}
                    RepairDecision::Amend(writes) => {
                        repaired += self.amend(&mut next, &mut touched, writes)?;
                        changes = self.resolve(&next, &touched)?.0;
                    }
                    RepairDecision::Veto => {
                        warn!(objects = touched.len(), "merge vetoed before commit");
                        return Err(SyncError::MergeVetoed);
                    }
                }
            }

            if let Err(e) = self.commit(&next, &changes, recorded.cursor).await {
                let Some(repair) = repair.filter(|_| !matches!(e, StoreError::SaveConflict { .. })) else {
                    return Err(SyncError::from_commit(e, SaveRace::Merge));
                };
                warn!(error = %e, "merge commit failed, asking repair hook");
                match repair.after_failed_commit(&changes, &e) {
                    RepairDecision::Accept => {}
                    RepairDecision::Amend(writes) => {
                        repaired += self.amend(&mut next, &mut touched, writes)?;
                        changes = self.resolve(&next, &touched)?.0;
                    }
                    RepairDecision::Veto => return Err(SyncError::Commit(e)),
                }
                self.commit(&next, &changes, recorded.cursor)
                    .await
                    .map_err(|e| SyncError::from_commit(e, SaveRace::Merge))?;
            }
            *state = next;
        }

        for change_set in &plan.deferred {
            debug!(revision = %change_set.revision, dependencies = %change_set.dependencies, "deferred change set");
        }

        // the repair is already committed locally, the next merge retries the upload
        if repaired > 0 {
            match self.upload(state).await {
                Ok(count) => uploaded += count,
                Err(e) => debug!(error = %e, "could not upload repair yet"),
            }
        }

        if self.ctx.config.publish_progress {
            if let Err(e) = self.ctx.publish_progress(state).await {
                debug!(error = %e, "could not publish merge progress");
            }
        }

        let report = MergeReport {
            uploaded,
            applied: plan.ordered.len(),
            deferred: plan.deferred.len(),
            conflicts_resolved,
            unreadable: downloaded.unreadable,
            repaired,
            touched_objects: touched,
        };
        info!(
            uploaded = report.uploaded,
            applied = report.applied,
            deferred = report.deferred,
            conflicts = report.conflicts_resolved,
            unreadable = report.unreadable,
            repaired = report.repaired,
            "merge finished"
        );
        self.ctx.emit(SyncEvent::MergeFinished(report.clone()));
        Ok(report)
    }

    /// Resolve the touched records into the writes a merge commits.
    fn resolve(&self, next: &SyncState, touched: &BTreeSet<GlobalId>) -> Result<(MergedChanges, usize)> {
        let mut changes = MergedChanges::default();
        let mut conflicts = 0;
        for global_id in touched {
            let Some(record) = next.records.get(global_id) else {
                continue;
            };
            match record.resolve(global_id, self.ctx.resolver.as_ref())? {
                Some(object) => {
                    conflicts += object.conflicts;
                    changes.puts.push(StoredObject::new(
                        global_id.clone(),
                        object.entity,
                        object.properties,
                    ));
                }
                None => changes.deletes.push(global_id.clone()),
            }
        }
        Ok((changes, conflicts))
    }

    async fn commit(
        &self,
        next: &SyncState,
        changes: &MergedChanges,
        cursor: u64,
    ) -> std::result::Result<(), StoreError> {
        let mut transaction = Transaction::new().expect_save_cursor(cursor);
        for object in &changes.puts {
            transaction = transaction.put(object.clone());
        }
        for global_id in &changes.deletes {
            transaction = transaction.delete(global_id.clone());
        }
        self.ctx.store.commit(transaction.sync_state(next.clone())).await
    }

    /// Record repair writes as a local change set on top of the merge, so
    /// they replicate like any other save.
    fn amend(
        &self,
        next: &mut SyncState,
        touched: &mut BTreeSet<GlobalId>,
        writes: Vec<RepairWrite>,
    ) -> Result<usize> {
        let Some(device) = next.device.clone() else {
            return Err(SyncError::NotLeeched);
        };
        let changes: Vec<ObjectChange> = writes
            .into_iter()
            .filter_map(|write| match write {
                RepairWrite::Put(object) => Some(ObjectChange::insert(
                    object.global_id,
                    object.entity,
                    object.properties,
                )),
                RepairWrite::Delete(global_id) => match next.records.get(&global_id) {
                    Some(record) => {
                        let entity = record.entity.clone();
                        Some(ObjectChange::delete(global_id, entity))
                    }
                    None => {
                        debug!(%global_id, "repair deletes an unknown object");
                        None
                    }
                },
            })
            .collect();
        if changes.is_empty() {
            return Ok(0);
        }

        let count = changes.len();
        let sequence = next.sequence + 1;
        let change_set = ChangeSet::new(
            Revision::new(device, sequence),
            now_millis(),
            next.applied(),
            changes,
        );
        touched.extend(apply_change_set(&mut next.records, &change_set));
        next.sequence = sequence;
        next.pending_uploads.push(change_set);
        debug!(writes = count, sequence, "recorded merge repair");
        Ok(count)
    }

    /// Make sure no change set this device still needs was folded into a
    /// baseline it never saw. If one was, deleech and fail so the next run
    /// leeches from the new baseline.
    async fn check_baseline(&self, state: &mut SyncState) -> Result<()> {
        let remote = &self.ctx.remote;
        let Some(entry) = remote.baselines().await?.into_iter().next() else {
            return Ok(());
        };
        if state.baseline == Some(entry.id) {
            return Ok(());
        }

        let baseline = remote.download_baseline(&entry).await?;
        let mut behind = false;
        for (device, &covered) in baseline.revisions.iter() {
            if Some(device) == state.device.as_ref() {
                continue;
            }
            let after = state.merge_records.get(device);
            if covered <= after {
                continue;
            }
            behind = true;
            let present: BTreeSet<u64> = remote.change_set_sequences(device, after).await?.into_iter().collect();
            if let Some(missing) = (after + 1..=covered).find(|s| !present.contains(s)) {
                warn!(
                    baseline = %entry.id.short(),
                    %device,
                    missing,
                    "change sets folded into a baseline this device never merged, deleeching"
                );
                LeechProtocol::new(self.ctx)
                    .deleech(state, DeleechReason::BaselineSuperseded)
                    .await?;
                return Err(SyncError::BaselineSuperseded);
            }
        }

        // Only adopt once nothing it covers is still to be merged; until then
        // the check runs again on every merge.
        if !behind {
            let mut next = state.clone();
            next.baseline = Some(entry.id);
            self.ctx
                .store
                .commit(Transaction::new().sync_state(next.clone()))
                .await?;
            *state = next;
            debug!(baseline = %entry.id.short(), "adopted newer baseline");
        }
        Ok(())
    }

    /// Deleech and fail if the cloud account is not the one we leeched with.
    async fn check_identity(&self, state: &mut SyncState) -> Result<()> {
        let current = self.ctx.remote.cloud().identity_token().await?;
        if current == state.identity_token {
            return Ok(());
        }
        warn!(
            recorded = ?state.identity_token,
            current = ?current,
            "cloud identity changed, deleeching"
        );
        LeechProtocol::new(self.ctx)
            .deleech(state, DeleechReason::IdentityChanged)
            .await?;
        Err(SyncError::CloudIdentityChanged)
    }

    /// Upload queued change sets, then drop them from the queue.
    async fn upload(&self, state: &mut SyncState) -> Result<usize> {
        if state.pending_uploads.is_empty() {
            return Ok(0);
        }

        let mut uploaded = 0;
        for change_set in &state.pending_uploads {
            self.ctx.checkpoint()?;
            if self.ctx.remote.upload_change_set(change_set).await? {
                uploaded += 1;
            }
        }

        let mut next = state.clone();
        next.pending_uploads.clear();
        self.ctx
            .store
            .commit(Transaction::new().sync_state(next.clone()))
            .await?;
        *state = next;
        Ok(uploaded)
    }

    /// Download every remote change set past our merge records.
    async fn download(&self, state: &SyncState) -> Result<Downloaded> {
        let remote = &self.ctx.remote;
        let mut devices: BTreeSet<DeviceId> = remote.change_set_devices().await?.into_iter().collect();
        devices.extend(remote.devices().await?.into_iter().map(|r| r.device));
        if let Some(own) = &state.device {
            devices.remove(own);
        }

        let mut wanted = Vec::new();
        for device in devices {
            let after = state.merge_records.get(&device);
            for sequence in remote.change_set_sequences(&device, after).await? {
                wanted.push((device.clone(), sequence));
            }
        }
        if wanted.is_empty() {
            return Ok(Downloaded::default());
        }

        self.ctx.checkpoint()?;
        debug!(count = wanted.len(), "downloading change sets");
        self.ctx.download(wanted).await
    }
}
