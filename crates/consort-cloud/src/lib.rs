//! Consort Cloud - the shared side of synchronization
//!
//! Devices never talk to one another. They exchange files through a cloud
//! file area that only needs list/get/put/delete with eventual visibility,
//! modelled by the [`CloudFileSystem`] trait.
//!
//! - [`RemoteEnsemble`] reads and writes one ensemble's change sets,
//!   baselines and device registrations
//! - [`MemoryCloudFileSystem`] is a shared in-memory area with offline,
//!   failure and delayed-visibility switches
//! - [`LocalDirCloudFileSystem`] stores files in a local directory

pub mod codec;
pub mod error;
pub mod fs;
pub mod layout;
pub mod local_dir;
pub mod memory;
pub mod remote;

pub use codec::{FileKind, FILE_FORMAT};
pub use error::{CloudError, CodecError, RemoteError, Result};
pub use fs::CloudFileSystem;
pub use layout::EnsembleLayout;
pub use local_dir::LocalDirCloudFileSystem;
pub use memory::MemoryCloudFileSystem;
pub use remote::{list_ensembles, remove_ensemble, BaselineEntry, DeviceRegistration, RemoteEnsemble};
