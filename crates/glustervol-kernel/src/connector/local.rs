//! Local directory connector.
//!
//! Serves the remote volume namespace from a directory on this host. In
//! production that directory is a mount of the whole Gluster volume (see
//! the `staged` connector in the server), so each operation here lands on
//! the cluster through the FUSE client.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use super::error::{ConnectorError, ConnectorResult};
use super::{Connector, DirEntry, EntryKind, EntryStat};

/// Mode for directories created on the remote volume.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Connector over a locally reachable copy of the remote namespace.
///
/// All paths are relative to `root`; `/vol1` maps to `root/vol1`. Paths
/// with `..` components are rejected.
#[derive(Debug, Clone)]
pub struct LocalConnector {
    root: PathBuf,
}

impl LocalConnector {
    /// Create a connector rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a volume-rooted path to a path under `root`.
    fn resolve(&self, path: &Path) -> ConnectorResult<PathBuf> {
        let mut full = self.root.clone();
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => full.push(part),
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(ConnectorError::path_escapes_root(path.display().to_string()));
                }
            }
        }
        Ok(full)
    }

    fn kind_of(file_type: std::fs::FileType) -> EntryKind {
        if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_symlink() {
            EntryKind::Symlink
        } else {
            EntryKind::File
        }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn create_dir(&self, path: &Path) -> ConnectorResult<()> {
        let full = self.resolve(path)?;
        let display = path.display().to_string();

        let mut builder = fs::DirBuilder::new();
        builder.mode(DEFAULT_DIR_MODE);
        builder
            .create(&full)
            .await
            .map_err(|e| ConnectorError::from_io(&display, e))
    }

    async fn list_dir(&self, path: &Path) -> ConnectorResult<Vec<DirEntry>> {
        let full = self.resolve(path)?;
        let display = path.display().to_string();

        let mut dir = fs::read_dir(&full)
            .await
            .map_err(|e| ConnectorError::from_io(&display, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let file_type = entry.file_type().await?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind: Self::kind_of(file_type),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn stat_dir(&self, path: &Path) -> ConnectorResult<EntryStat> {
        let full = self.resolve(path)?;
        let display = path.display().to_string();

        let meta = fs::symlink_metadata(&full)
            .await
            .map_err(|e| ConnectorError::from_io(&display, e))?;

        Ok(EntryStat {
            name: full
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            kind: Self::kind_of(meta.file_type()),
            mtime: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
        })
    }

    async fn remove_tree(&self, path: &Path) -> ConnectorResult<()> {
        let full = self.resolve(path)?;
        if full == self.root {
            return Err(ConnectorError::other("refusing to remove the volume root"));
        }

        let stat = self.stat_dir(path).await?;
        if !stat.is_dir() {
            return Err(ConnectorError::not_a_directory(path.display().to_string()));
        }

        fs::remove_dir_all(&full)
            .await
            .map_err(|e| ConnectorError::from_io(&path.display().to_string(), e))
    }
}
