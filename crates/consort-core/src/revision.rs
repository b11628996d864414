//! Revisions and revision sets.
//!
//! A [`Revision`] names one change set: the device that produced it and that
//! device's sequence number. A [`RevisionSet`] summarizes everything a device
//! has applied by tracking the highest contiguous sequence seen from each
//! device. Sequence 0 stands for the baseline and is contained by every set.

use crate::ids::DeviceId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identity of a change set.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision {
    pub device: DeviceId,
    pub sequence: u64,
}

impl Revision {
    pub fn new(device: DeviceId, sequence: u64) -> Self {
        Self { device, sequence }
    }

    /// The revision every baseline write carries.
    pub fn baseline(device: DeviceId) -> Self {
        Self { device, sequence: 0 }
    }

    pub fn is_baseline(&self) -> bool {
        self.sequence == 0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.device, self.sequence)
    }
}

/// Highest contiguous sequence number observed per device.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionSet {
    entries: BTreeMap<DeviceId, u64>,
}

impl RevisionSet {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (DeviceId, u64)>) -> Self {
        let mut set = Self::new();
        for (device, sequence) in entries {
            set.set(device, sequence);
        }
        set
    }

    /// Sequence observed for `device`; 0 when unknown.
    pub fn get(&self, device: &DeviceId) -> u64 {
        self.entries.get(device).copied().unwrap_or(0)
    }

    /// Set the sequence for a device. Zero entries are not stored.
    pub fn set(&mut self, device: DeviceId, sequence: u64) {
        if sequence > 0 {
            self.entries.insert(device, sequence);
        } else {
            self.entries.remove(&device);
        }
    }

    /// Increment the sequence for a device, returning the new value.
    pub fn increment(&mut self, device: &DeviceId) -> u64 {
        let entry = self.entries.entry(device.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn remove(&mut self, device: &DeviceId) {
        self.entries.remove(device);
    }

    /// True when `revision` has been observed. Baseline revisions always have.
    pub fn contains(&self, revision: &Revision) -> bool {
        self.get(&revision.device) >= revision.sequence
    }

    /// Returns true if for all devices, self[d] >= other[d].
    pub fn dominates(&self, other: &RevisionSet) -> bool {
        other
            .entries
            .iter()
            .all(|(device, &seq)| self.get(device) >= seq)
    }

    pub fn is_concurrent_with(&self, other: &RevisionSet) -> bool {
        !self.dominates(other) && !other.dominates(self)
    }

    /// Component-wise max.
    pub fn merge(&mut self, other: &RevisionSet) {
        for (device, &seq) in &other.entries {
            let current = self.entries.entry(device.clone()).or_insert(0);
            *current = (*current).max(seq);
        }
    }

    pub fn merged_with(&self, other: &RevisionSet) -> RevisionSet {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// Component-wise min over the union of devices; a device missing on
    /// either side counts as 0.
    pub fn min_with(&self, other: &RevisionSet) -> RevisionSet {
        let devices: BTreeSet<&DeviceId> =
            self.entries.keys().chain(other.entries.keys()).collect();

        let mut result = RevisionSet::new();
        for device in devices {
            result.set(device.clone(), self.get(device).min(other.get(device)));
        }
        result
    }

    /// Ranges present in self but not in other: (device, first, last).
    pub fn diff(&self, other: &RevisionSet) -> Vec<(DeviceId, u64, u64)> {
        self.entries
            .iter()
            .filter_map(|(device, &seq)| {
                let theirs = other.get(device);
                (seq > theirs).then(|| (device.clone(), theirs + 1, seq))
            })
            .collect()
    }

    /// Total number of change sets covered.
    pub fn total(&self) -> u64 {
        self.entries.values().sum()
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceId> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, &u64)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for RevisionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (device, seq)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", device, seq)?;
        }
        write!(f, "}}")
    }
}
