//! Consort Core - data model of the store-synchronization engine
//!
//! Every device of an ensemble records its local saves as immutable
//! [`ChangeSet`]s, publishes them through a shared cloud file area and
//! merges the change sets of every other device. This crate holds the
//! pieces of that process that need no I/O:
//!
//! - [`RevisionSet`]: per-device sequence vector, used both as the causal
//!   token of a change set and as a device's merge progress
//! - [`ObjectRecord`]: per-property antichains of concurrent writes plus
//!   tombstones, so merge results do not depend on delivery order
//! - [`ConflictResolver`]: pure tie-break policy for concurrent writes
//! - [`plan_merge`]: causal ordering of downloaded change sets
//! - [`Baseline`]: content-addressed full state new devices start from
//!
//! # Example
//!
//! ```rust
//! use consort_core::{
//!     apply_change_set, ChangeSet, DeviceId, GlobalId, LastWriterWins, ObjectChange,
//!     RecordTable, Revision, RevisionSet, properties,
//! };
//!
//! let device = DeviceId::new("device-a");
//! let change_set = ChangeSet::new(
//!     Revision::new(device, 1),
//!     1_700_000_000_000,
//!     RevisionSet::new(),
//!     vec![ObjectChange::insert(
//!         GlobalId::new("counter"),
//!         "Number",
//!         properties([("number", 5i64)]),
//!     )],
//! );
//!
//! let mut table = RecordTable::new();
//! apply_change_set(&mut table, &change_set);
//!
//! let record = &table[&GlobalId::new("counter")];
//! let object = record.resolve(&GlobalId::new("counter"), &LastWriterWins).unwrap();
//! assert_eq!(object.unwrap().properties["number"].as_int(), Some(5));
//! ```

pub mod baseline;
pub mod causal;
pub mod change;
pub mod hash;
pub mod ids;
pub mod record;
pub mod resolver;
pub mod revision;
pub mod value;

pub use baseline::{Baseline, BaselineError, BASELINE_FORMAT};
pub use causal::{apply_change_set, plan_merge, MergePlan, OrderKey};
pub use change::{ChangeKind, ChangeSet, ObjectChange};
pub use hash::{ContentHash, ContentHasher};
pub use ids::{DeviceId, GlobalId};
pub use record::{ObjectRecord, RecordTable, ResolvedObject, Stamp, StampedValue};
pub use resolver::{Candidate, ConflictResolver, LastWriterWins, LowestDeviceWins, ResolveError};
pub use revision::{Revision, RevisionSet};
pub use value::{properties, Properties, Value};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
