//! Conflict resolution policy.
//!
//! A resolver is consulted only for a property whose live writes are
//! causally concurrent; deletes are settled by the record itself before a
//! resolver ever runs. Resolvers must be pure: every replica calls them
//! with the same candidates in the same order and must get the same answer.

use crate::ids::GlobalId;
use crate::record::Stamp;
use crate::value::Value;
use thiserror::Error;

/// One concurrent write offered to a resolver.
#[derive(Clone, Copy, Debug)]
pub struct Candidate<'a> {
    pub stamp: &'a Stamp,
    pub value: &'a Value,
}

/// Raised when a resolver breaks its contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("resolver {resolver} made no valid choice among {candidates} candidates for {global_id}.{property}")]
    InvalidChoice {
        resolver: String,
        global_id: GlobalId,
        property: String,
        candidates: usize,
    },
}

/// Picks the winning write among concurrent candidates.
///
/// Candidates arrive sorted by `(timestamp, device, sequence)`. Return the
/// index of the winner; `None` or an out-of-range index is a contract
/// violation and aborts the merge.
pub trait ConflictResolver: Send + Sync {
    fn name(&self) -> &str;

    fn choose(
        &self,
        global_id: &GlobalId,
        property: &str,
        candidates: &[Candidate<'_>],
    ) -> Option<usize>;
}

/// Latest `(timestamp, device, sequence)` wins.
#[derive(Clone, Copy, Debug, Default)]
pub struct LastWriterWins;

impl ConflictResolver for LastWriterWins {
    fn name(&self) -> &str {
        "last-writer-wins"
    }

    fn choose(&self, _: &GlobalId, _: &str, candidates: &[Candidate<'_>]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.stamp.order_key().cmp(&b.stamp.order_key()))
            .map(|(i, _)| i)
    }
}

/// The write from the lexicographically smallest device id wins, ignoring
/// clocks entirely. Useful when device clocks cannot be trusted.
#[derive(Clone, Copy, Debug, Default)]
pub struct LowestDeviceWins;

impl ConflictResolver for LowestDeviceWins {
    fn name(&self) -> &str {
        "lowest-device-wins"
    }

    fn choose(&self, _: &GlobalId, _: &str, candidates: &[Candidate<'_>]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                let ka = (&a.stamp.revision.device, std::cmp::Reverse(a.stamp.revision.sequence));
                let kb = (&b.stamp.revision.device, std::cmp::Reverse(b.stamp.revision.sequence));
                ka.cmp(&kb)
            })
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::DeviceId;
    use crate::revision::{Revision, RevisionSet};

    fn stamp(device: &str, seq: u64, ts: i64) -> Stamp {
        Stamp::new(Revision::new(DeviceId::from(device), seq), ts, RevisionSet::new())
    }

    #[test]
    fn test_last_writer_wins_uses_timestamp_then_device() {
        let (s1, s2, s3) = (stamp("b", 1, 10), stamp("a", 1, 20), stamp("c", 1, 20));
        let (v1, v2, v3) = (Value::Int(1), Value::Int(2), Value::Int(3));
        let candidates = [
            Candidate { stamp: &s1, value: &v1 },
            Candidate { stamp: &s2, value: &v2 },
            Candidate { stamp: &s3, value: &v3 },
        ];
        let gid = GlobalId::from("x");
        assert_eq!(LastWriterWins.choose(&gid, "p", &candidates), Some(2));
        assert_eq!(LowestDeviceWins.choose(&gid, "p", &candidates), Some(1));
    }

    #[test]
    fn test_empty_candidates_yield_no_choice() {
        let gid = GlobalId::from("x");
        assert_eq!(LastWriterWins.choose(&gid, "p", &[]), None);
    }
}
