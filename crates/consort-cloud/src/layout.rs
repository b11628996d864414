//! Where an ensemble keeps its files.
//!
//! ```text
//! <ensemble>/devices/<device>.json
//! <ensemble>/baselines/<created_at>_<id>.json
//! <ensemble>/changesets/<device>/<sequence>.json
//! ```
//!
//! Numbers are zero-padded to 20 digits so lexical and numeric order agree.

use consort_core::{Baseline, ContentHash, DeviceId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnsembleLayout {
    ensemble: String,
}

impl EnsembleLayout {
    pub fn new(ensemble: impl Into<String>) -> Self {
        Self {
            ensemble: ensemble.into(),
        }
    }

    pub fn ensemble(&self) -> &str {
        &self.ensemble
    }

    pub fn root(&self) -> String {
        self.ensemble.clone()
    }

    pub fn devices_dir(&self) -> String {
        format!("{}/devices", self.ensemble)
    }

    pub fn device_file(&self, device: &DeviceId) -> String {
        format!("{}/{}.json", self.devices_dir(), device)
    }

    pub fn baselines_dir(&self) -> String {
        format!("{}/baselines", self.ensemble)
    }

    pub fn baseline_file(&self, baseline: &Baseline) -> String {
        format!(
            "{}/{:020}_{}.json",
            self.baselines_dir(),
            baseline.created_at,
            baseline.id
        )
    }

    pub fn change_sets_dir(&self) -> String {
        format!("{}/changesets", self.ensemble)
    }

    pub fn device_change_sets_dir(&self, device: &DeviceId) -> String {
        format!("{}/{}", self.change_sets_dir(), device)
    }

    pub fn change_set_file(&self, device: &DeviceId, sequence: u64) -> String {
        format!("{}/{:020}.json", self.device_change_sets_dir(device), sequence)
    }

    fn file_stem<'a>(&self, path: &'a str, dir: &str) -> Option<&'a str> {
        path.strip_prefix(dir)?
            .strip_prefix('/')?
            .strip_suffix(".json")
    }

    pub fn parse_device_file(&self, path: &str) -> Option<DeviceId> {
        let stem = self.file_stem(path, &self.devices_dir())?;
        (!stem.contains('/')).then(|| DeviceId::new(stem))
    }

    pub fn parse_baseline_file(&self, path: &str) -> Option<(i64, ContentHash)> {
        let stem = self.file_stem(path, &self.baselines_dir())?;
        let (created_at, id) = stem.split_once('_')?;
        Some((created_at.parse().ok()?, ContentHash::from_hex(id)?))
    }

    pub fn parse_change_set_file(&self, path: &str) -> Option<(DeviceId, u64)> {
        let stem = self.file_stem(path, &self.change_sets_dir())?;
        let (device, sequence) = stem.split_once('/')?;
        if device.is_empty() || sequence.contains('/') {
            return None;
        }
        Some((DeviceId::new(device), sequence.parse().ok()?))
    }
}
