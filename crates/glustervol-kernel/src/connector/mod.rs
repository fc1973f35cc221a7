//! Remote filesystem connectors.
//!
//! A connector gives the driver directory-level access to the namespace of
//! the remote Gluster volume. Each plugin volume is one top-level directory
//! of that namespace. Paths handed to a connector are rooted at the remote
//! volume (`/name`, or `.` for the root itself).
//!
//! - [`LocalConnector`] - the remote volume reachable as a local tree
//!   (normally the staging mount of the whole volume)
//! - [`MemoryConnector`] - in-memory namespace for tests and dry runs
//! - [`BucketConnector`] - object-storage variant with a fixed bucket set

mod bucket;
mod error;
mod local;
mod memory;

use async_trait::async_trait;
use std::path::Path;
use std::time::SystemTime;

pub use bucket::BucketConnector;
pub use error::{ConnectorError, ConnectorResult};
pub use local::{DEFAULT_DIR_MODE, LocalConnector};
pub use memory::MemoryConnector;

/// Kind of a remote directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

impl EntryKind {
    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, EntryKind::Directory)
    }
}

/// One entry returned by [`Connector::list_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Metadata returned by [`Connector::stat_dir`].
#[derive(Debug, Clone)]
pub struct EntryStat {
    /// Final path component of the entry.
    pub name: String,
    pub kind: EntryKind,
    /// Last modification time, reported as the volume's creation time.
    pub mtime: SystemTime,
}

impl EntryStat {
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Directory operations against the remote volume namespace.
///
/// These are the only remote operations the driver needs. Backends that
/// cannot support one return [`ConnectorError::Unsupported`].
#[async_trait]
pub trait Connector: Send + Sync {
    /// Short backend name for logs and errors.
    fn backend(&self) -> &'static str;

    /// Create a single directory. Fails if it already exists.
    async fn create_dir(&self, path: &Path) -> ConnectorResult<()>;

    /// List the entries of a directory (no `.`/`..`).
    async fn list_dir(&self, path: &Path) -> ConnectorResult<Vec<DirEntry>>;

    /// Stat an entry without following a final symlink.
    async fn stat_dir(&self, path: &Path) -> ConnectorResult<EntryStat>;

    /// Recursively delete a directory and everything under it.
    async fn remove_tree(&self, path: &Path) -> ConnectorResult<()>;
}
