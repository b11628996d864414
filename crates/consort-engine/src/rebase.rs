//! Compaction: folding merged change sets into a new baseline.
//!
//! The stable frontier is the component-wise minimum of the merge progress
//! every registered device has published. Change sets inside it are never
//! needed again by a registered device, so they are folded into a new
//! baseline and deleted. Run it from one device at a time.

use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use consort_core::{now_millis, plan_merge, ContentHash, RevisionSet};
use consort_store::{SyncState, Transaction};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RebaseReport {
    /// The new baseline, if one was written.
    pub baseline: Option<ContentHash>,
    /// Change sets folded into it.
    pub folded: usize,
    pub frontier: RevisionSet,
}

impl RebaseReport {
    pub fn skipped(frontier: RevisionSet) -> Self {
        Self {
            frontier,
            ..Self::default()
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.baseline.is_none()
    }
}

pub struct Rebaser<'a> {
    ctx: &'a SyncContext,
}

impl<'a> Rebaser<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    pub async fn rebase(&self, state: &mut SyncState) -> Result<RebaseReport> {
        let Some(device) = state.device.clone().filter(|_| state.is_leeched()) else {
            return Err(SyncError::NotLeeched);
        };
        let remote = &self.ctx.remote;

        let frontier = remote
            .devices()
            .await?
            .into_iter()
            .map(|r| r.merged)
            .reduce(|a, b| a.min_with(&b))
            .unwrap_or_default();

        let Some(current) = remote.baselines().await?.into_iter().next() else {
            warn!("no baseline to rebase");
            return Ok(RebaseReport::skipped(frontier));
        };
        let baseline = remote.download_baseline(&current).await?;
        self.ctx.checkpoint()?;

        let mut wanted = Vec::new();
        for (device, &upto) in frontier.iter() {
            let from = baseline.revisions.get(device);
            for sequence in remote.change_set_sequences(device, from).await? {
                if sequence <= upto {
                    wanted.push((device.clone(), sequence));
                }
            }
        }
        if wanted.is_empty() || wanted.len() < self.ctx.config.rebase_min_change_sets {
            debug!(foldable = wanted.len(), "not enough change sets to rebase");
            return Ok(RebaseReport::skipped(frontier));
        }

        let downloaded = self.ctx.download(wanted).await?;
        self.ctx.checkpoint()?;
        if downloaded.unreadable > 0 {
            warn!(unreadable = downloaded.unreadable, "leaving unreadable change sets unfolded");
        }

        let plan = plan_merge(&baseline.revisions, downloaded.change_sets);
        if !plan.deferred.is_empty() {
            debug!(deferred = plan.deferred.len(), "leaving change sets with missing dependencies unfolded");
        }
        if plan.ordered.is_empty() {
            return Ok(RebaseReport::skipped(frontier));
        }

        let folded = baseline.fold(device, now_millis(), &plan.ordered, plan.applied.clone())?;
        remote.upload_baseline(&folded).await?;

        // From here the new baseline is authoritative; cleanup is best effort.
        if let Err(e) = remote.delete_baseline(&current).await {
            warn!(path = %current.path, error = %e, "could not delete previous baseline");
        }
        for change_set in &plan.ordered {
            if let Err(e) = remote
                .delete_change_set(change_set.device(), change_set.sequence())
                .await
            {
                warn!(revision = %change_set.revision, error = %e, "could not delete folded change set");
            }
        }

        let mut next = state.clone();
        next.baseline = Some(folded.id);
        self.ctx
            .store
            .commit(Transaction::new().sync_state(next.clone()))
            .await?;
        *state = next;

        info!(
            baseline = %folded.id.short(),
            folded = plan.ordered.len(),
            frontier = %frontier,
            "rebased ensemble"
        );
        Ok(RebaseReport {
            baseline: Some(folded.id),
            folded: plan.ordered.len(),
            frontier,
        })
    }
}
