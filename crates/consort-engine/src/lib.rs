//! Consort Engine - keeps local stores in sync through a cloud file area
//!
//! Each device joins an ensemble by *leeching*: it either seeds the
//! ensemble's origin baseline from its own objects or replaces them with the
//! existing baseline. From then on every *merge* records the application's
//! saves as change sets, uploads them, downloads the other devices' change
//! sets and applies them in causal order, with a [`ConflictResolver`]
//! settling concurrent writes.
//!
//! # Architecture
//!
//! - [`LeechProtocol`]: join and leave an ensemble
//! - [`MergeEngine`]: record, upload, download and apply change sets
//! - [`Rebaser`]: fold change sets every device has merged into a new baseline
//! - [`MergeRepair`]: application hook between resolving a merge and committing it
//! - [`SyncScheduler`]: one worker, coalesced triggers, retry with backoff
//! - [`SyncSession`]: the object an application holds
//!
//! Every local change, object writes and sync metadata together, reaches the
//! store through a single atomic [`Transaction`](consort_store::Transaction).
//!
//! [`ConflictResolver`]: consort_core::ConflictResolver

pub mod backoff;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod leech;
pub mod merge;
pub mod rebase;
pub mod repair;
pub mod scheduler;
pub mod session;

pub use backoff::RetryPolicy;
pub use config::{SyncConfig, SyncConfigBuilder};
pub use context::SyncContext;
pub use error::{ErrorKind, Result, SyncError};
pub use event::{DeleechReason, MergeReport, SyncEvent, SyncOperation, SyncTrigger};
pub use leech::{LeechOutcome, LeechProtocol};
pub use merge::{MergeEngine, Recorded};
pub use rebase::{RebaseReport, Rebaser};
pub use repair::{MergeRepair, MergedChanges, RepairDecision, RepairWrite};
pub use scheduler::{SchedulerStatus, SyncJob, SyncScheduler};
pub use session::SyncSession;

pub use consort_cloud::{list_ensembles, remove_ensemble};
