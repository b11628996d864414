//! Consort Store - the local side of synchronization
//!
//! The engine talks to the application's persistent store through the
//! [`LocalStore`] trait: it reads save notifications, and applies object
//! writes together with its own [`SyncState`] in a single [`Transaction`].
//!
//! - [`ChangeSetExtractor`] turns save notifications into object changes
//! - [`MemoryLocalStore`] is a shared in-memory store with crash injection
//! - [`FileLocalStore`] persists everything to one JSON file

mod data;
pub mod error;
pub mod extractor;
pub mod file;
pub mod memory;
pub mod save;
pub mod state;
pub mod store;

pub use error::{ExtractionError, Result, StoreError};
pub use extractor::ChangeSetExtractor;
pub use file::FileLocalStore;
pub use memory::MemoryLocalStore;
pub use save::{LocalSave, PendingSaves, SaveNotification, SavedObject, StoredObject};
pub use state::{LeechState, SyncState};
pub use store::{LocalStore, Transaction};
