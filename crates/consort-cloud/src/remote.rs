//! Typed access to one ensemble's files.

use crate::codec::{decode, encode, FileKind};
use crate::error::{CloudError, CodecError, Result};
use crate::fs::CloudFileSystem;
use crate::layout::EnsembleLayout;
use consort_core::{Baseline, ChangeSet, ContentHash, DeviceId, RevisionSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// What a device publishes about itself under `devices/`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub device: DeviceId,
    pub registered_at: i64,
    pub identity_token: Option<String>,
    /// Everything the device has merged, as of `updated_at`.
    pub merged: RevisionSet,
    pub updated_at: i64,
}

/// A baseline file found in the cloud, not yet downloaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaselineEntry {
    pub path: String,
    pub created_at: i64,
    pub id: ContentHash,
}

impl BaselineEntry {
    pub fn precedence(&self) -> (i64, ContentHash) {
        (self.created_at, self.id)
    }
}

#[derive(Clone)]
pub struct RemoteEnsemble {
    cloud: Arc<dyn CloudFileSystem>,
    layout: EnsembleLayout,
}

impl RemoteEnsemble {
    pub fn new(cloud: Arc<dyn CloudFileSystem>, ensemble: impl Into<String>) -> Self {
        Self {
            cloud,
            layout: EnsembleLayout::new(ensemble),
        }
    }

    pub fn layout(&self) -> &EnsembleLayout {
        &self.layout
    }

    pub fn cloud(&self) -> &Arc<dyn CloudFileSystem> {
        &self.cloud
    }

    // ========================================================================
    // Devices
    // ========================================================================

    /// Write (or overwrite) a device registration.
    pub async fn publish_device(&self, registration: &DeviceRegistration) -> Result<()> {
        let bytes = encode(FileKind::Device, registration)?;
        self.cloud
            .put(&self.layout.device_file(&registration.device), bytes)
            .await?;
        Ok(())
    }

    pub async fn device(&self, device: &DeviceId) -> Result<Option<DeviceRegistration>> {
        match self.cloud.get(&self.layout.device_file(device)).await {
            Ok(bytes) => Ok(Some(decode(FileKind::Device, &bytes)?)),
            Err(CloudError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every readable registration. Unreadable ones are skipped.
    pub async fn devices(&self) -> Result<Vec<DeviceRegistration>> {
        let mut registrations = Vec::new();
        for path in self.cloud.list(&self.layout.devices_dir()).await? {
            if self.layout.parse_device_file(&path).is_none() {
                continue;
            }
            let bytes = match self.cloud.get(&path).await {
                Ok(bytes) => bytes,
                Err(CloudError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            match decode::<DeviceRegistration>(FileKind::Device, &bytes) {
                Ok(registration) => registrations.push(registration),
                Err(e) => warn!(path = %path, error = %e, "skipping unreadable device registration"),
            }
        }
        Ok(registrations)
    }

    pub async fn remove_device(&self, device: &DeviceId) -> Result<()> {
        self.cloud.delete(&self.layout.device_file(device)).await?;
        Ok(())
    }

    // ========================================================================
    // Baselines
    // ========================================================================

    /// Baseline files, the one that takes precedence first.
    pub async fn baselines(&self) -> Result<Vec<BaselineEntry>> {
        let mut entries: Vec<BaselineEntry> = self
            .cloud
            .list(&self.layout.baselines_dir())
            .await?
            .into_iter()
            .filter_map(|path| {
                let (created_at, id) = self.layout.parse_baseline_file(&path)?;
                Some(BaselineEntry {
                    path,
                    created_at,
                    id,
                })
            })
            .collect();
        entries.sort_by_key(|e| e.precedence());
        Ok(entries)
    }

    pub async fn upload_baseline(&self, baseline: &Baseline) -> Result<BaselineEntry> {
        let path = self.layout.baseline_file(baseline);
        let bytes = encode(FileKind::Baseline, baseline)?;
        self.cloud.put(&path, bytes).await?;
        debug!(baseline = %baseline.id.short(), objects = baseline.records.len(), "uploaded baseline");
        Ok(BaselineEntry {
            path,
            created_at: baseline.created_at,
            id: baseline.id,
        })
    }

    /// Download and verify a baseline.
    pub async fn download_baseline(&self, entry: &BaselineEntry) -> Result<Baseline> {
        let bytes = self.cloud.get(&entry.path).await?;
        let baseline: Baseline = decode(FileKind::Baseline, &bytes)?;
        baseline.verify().map_err(CodecError::from)?;
        if baseline.id != entry.id {
            return Err(CodecError::RevisionMismatch {
                path: entry.path.clone(),
                found: baseline.id.to_hex(),
            }
            .into());
        }
        Ok(baseline)
    }

    pub async fn delete_baseline(&self, entry: &BaselineEntry) -> Result<()> {
        self.cloud.delete(&entry.path).await?;
        Ok(())
    }

    // ========================================================================
    // Change sets
    // ========================================================================

    /// Devices that have published at least one change set.
    pub async fn change_set_devices(&self) -> Result<Vec<DeviceId>> {
        let devices: BTreeSet<DeviceId> = self
            .cloud
            .list(&self.layout.change_sets_dir())
            .await?
            .iter()
            .filter_map(|path| self.layout.parse_change_set_file(path))
            .map(|(device, _)| device)
            .collect();
        Ok(devices.into_iter().collect())
    }

    /// Sequences published by `device` above `after`, ascending.
    pub async fn change_set_sequences(&self, device: &DeviceId, after: u64) -> Result<Vec<u64>> {
        let mut sequences: Vec<u64> = self
            .cloud
            .list(&self.layout.device_change_sets_dir(device))
            .await?
            .iter()
            .filter_map(|path| self.layout.parse_change_set_file(path))
            .filter(|(d, seq)| d == device && *seq > after)
            .map(|(_, seq)| seq)
            .collect();
        sequences.sort_unstable();
        Ok(sequences)
    }

    /// Upload a change set. Returns false when the file was already there,
    /// which happens when a previous run uploaded it but crashed before
    /// recording that.
    pub async fn upload_change_set(&self, change_set: &ChangeSet) -> Result<bool> {
        let path = self
            .layout
            .change_set_file(change_set.device(), change_set.sequence());
        if self.cloud.exists(&path).await? {
            debug!(revision = %change_set.revision, "change set already uploaded");
            return Ok(false);
        }
        let bytes = encode(FileKind::ChangeSet, change_set)?;
        self.cloud.put(&path, bytes).await?;
        Ok(true)
    }

    /// Download a change set, checking it is the one its path names.
    pub async fn download_change_set(&self, device: &DeviceId, sequence: u64) -> Result<ChangeSet> {
        let path = self.layout.change_set_file(device, sequence);
        let bytes = self.cloud.get(&path).await?;
        let change_set: ChangeSet = decode(FileKind::ChangeSet, &bytes)?;
        if change_set.device() != device || change_set.sequence() != sequence {
            return Err(CodecError::RevisionMismatch {
                path,
                found: change_set.revision.to_string(),
            }
            .into());
        }
        Ok(change_set)
    }

    pub async fn delete_change_set(&self, device: &DeviceId, sequence: u64) -> Result<()> {
        self.cloud
            .delete(&self.layout.change_set_file(device, sequence))
            .await?;
        Ok(())
    }

    /// Delete every file of the ensemble.
    pub async fn remove_all(&self) -> Result<usize> {
        let paths = self.cloud.list(&self.layout.root()).await?;
        for path in &paths {
            self.cloud.delete(path).await?;
        }
        Ok(paths.len())
    }
}

/// Identifiers of every ensemble present in the cloud file area.
pub async fn list_ensembles(cloud: &dyn CloudFileSystem) -> std::result::Result<Vec<String>, CloudError> {
    let ensembles: BTreeSet<String> = cloud
        .list("")
        .await?
        .iter()
        .filter_map(|path| path.split_once('/').map(|(root, _)| root.to_string()))
        .collect();
    Ok(ensembles.into_iter().collect())
}

/// Delete every file of ensemble `ensemble`, returning how many were removed.
pub async fn remove_ensemble(cloud: Arc<dyn CloudFileSystem>, ensemble: &str) -> Result<usize> {
    let removed = RemoteEnsemble::new(cloud, ensemble).remove_all().await?;
    debug!(ensemble, removed, "removed ensemble");
    Ok(removed)
}
