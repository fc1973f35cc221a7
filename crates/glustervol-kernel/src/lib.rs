//! # glustervol-kernel
//!
//! Volume driver core for the GlusterFS Docker volume plugin.
//!
//! Each plugin volume is a top-level directory of one Gluster volume. The
//! kernel tracks which of them are mounted on this host and for which
//! containers:
//! - [`MountRegistry`] counts acquisitions per volume and per client
//! - [`MountOrchestrator`] mounts on the first acquisition and unmounts
//!   after the last, recovering from stale mountpoints
//! - [`VolumeDriver`] implements the protocol verbs under one lock
//!
//! Remote directory access goes through a [`Connector`] and physical
//! mounts through a [`MountExecutor`], so both can be swapped in tests.

pub mod config;
pub mod connector;
pub mod driver;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod registry;

pub use config::{ConfigError, ConnectorKind, PluginConfig};
pub use connector::{
    BucketConnector, Connector, ConnectorError, ConnectorResult, DirEntry, EntryKind, EntryStat,
    LocalConnector, MemoryConnector,
};
pub use driver::{Scope, VolumeDriver, VolumeInfo, VolumeStatus, VolumeSummary, validate_name};
pub use error::{PluginError, PluginResult};
pub use executor::{
    ExecutorError, HelperExecutor, HelperInvocation, HelperKind, HelperPrograms, MountExecutor,
    MountRequest,
};
#[cfg(any(test, feature = "test-mock"))]
pub use executor::{Invocation, RecordingExecutor};
pub use orchestrator::{MountOrchestrator, MountpointState};
pub use registry::{MountEntry, MountRegistry, RegistryError};
