//! OS mount executors.
//!
//! An executor attaches a remote subdirectory to a local mountpoint and
//! detaches it again. [`HelperExecutor`] shells out to the Gluster FUSE
//! client or `mount`/`umount`. [`RecordingExecutor`] is an in-process fake
//! for tests.
//!
//! Calls are awaited to completion with no timeout. The driver holds its
//! registry lock across them, so a helper that never exits stalls every
//! later plugin request.

mod process;
#[cfg(any(test, feature = "test-mock"))]
mod recording;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use process::{HelperExecutor, HelperInvocation, HelperPrograms};
#[cfg(any(test, feature = "test-mock"))]
pub use recording::{Invocation, RecordingExecutor};

/// Which helper performs physical mounts.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HelperKind {
    /// Run the `glusterfs` FUSE client directly with `--subdir-mount`.
    #[default]
    Glusterfs,
    /// Run `mount -t glusterfs server:/volume/subdir`.
    Mount,
}

/// Errors from mount and unmount helpers.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The helper process could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The helper ran and exited unsuccessfully.
    #[error("exec failed: {program} exited with {status} ({output})")]
    Failed {
        program: String,
        status: String,
        /// Combined stdout and stderr of the helper.
        output: String,
    },

    /// Mounting needs at least one volfile server.
    #[error("no Gluster servers configured for the {0} helper")]
    NoServers(HelperKind),
}

/// One physical mount to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    /// Plugin volume name (empty for a whole-volume mount).
    pub name: String,
    /// Subdirectory of the remote volume to attach, rooted at `/`.
    pub subdir: PathBuf,
    /// Local directory to attach it to.
    pub mountpoint: PathBuf,
}

impl MountRequest {
    /// Attach the remote directory `/name` at `mountpoint`.
    pub fn volume(name: &str, mountpoint: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            subdir: Path::new("/").join(name),
            mountpoint: mountpoint.into(),
        }
    }

    /// Attach the entire remote volume at `mountpoint`.
    pub fn whole_volume(mountpoint: impl Into<PathBuf>) -> Self {
        Self {
            name: String::new(),
            subdir: PathBuf::from("/"),
            mountpoint: mountpoint.into(),
        }
    }

    /// True when the request covers the whole remote volume.
    pub fn is_whole_volume(&self) -> bool {
        self.subdir == Path::new("/")
    }
}

/// Physical attach/detach of mountpoints.
#[async_trait]
pub trait MountExecutor: Send + Sync {
    /// Attach `request.subdir` of the remote volume at `request.mountpoint`.
    async fn mount(&self, request: &MountRequest) -> Result<(), ExecutorError>;

    /// Detach whatever is mounted at `mountpoint`.
    async fn unmount(&self, mountpoint: &Path) -> Result<(), ExecutorError>;
}
