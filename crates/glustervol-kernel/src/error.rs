//! Plugin error types.
//!
//! [`PluginError`] is what every driver operation returns. The protocol
//! layer renders its `Display` form into the response's `Err` field.

use std::io;
use std::path::Path;
use thiserror::Error;

use crate::connector::ConnectorError;
use crate::executor::ExecutorError;
use crate::registry::RegistryError;

/// Error returned by driver and orchestrator operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The remote filesystem rejected an operation or was unreachable.
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// A mount or unmount helper failed.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// The request does not match the tracked mount state.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The local mountpoint exists and is not a directory.
    #[error("{0} already exists and is not a directory")]
    PathConflict(String),

    /// The remote entry for a volume exists but is not a directory.
    #[error("expected a directory for volume: {0}")]
    NotADirectory(String),

    /// Path was requested for a volume with no active mount.
    #[error("volume is not mounted: {0}")]
    NotMounted(String),

    /// Volume name is not a single plain path component.
    #[error("invalid volume name: {0:?}")]
    InvalidName(String),

    /// Local I/O failure while preparing a mountpoint.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl PluginError {
    /// Create a PathConflict error.
    pub fn path_conflict(path: &Path) -> Self {
        Self::PathConflict(path.display().to_string())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(name: impl Into<String>) -> Self {
        Self::NotADirectory(name.into())
    }

    /// Create a NotMounted error.
    pub fn not_mounted(name: impl Into<String>) -> Self {
        Self::NotMounted(name.into())
    }

    /// Create an InvalidName error.
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName(name.into())
    }

    /// Wrap a local I/O error with the path it happened on.
    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;
