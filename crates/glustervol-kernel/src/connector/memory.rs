//! In-memory connector.
//!
//! Used for tests and `--connector memory` dry runs. All data is ephemeral.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use super::error::{ConnectorError, ConnectorResult};
use super::{Connector, DirEntry, EntryKind, EntryStat};

#[derive(Debug, Clone)]
struct Entry {
    kind: EntryKind,
    mtime: SystemTime,
}

/// In-memory remote namespace.
///
/// Keys are normalized relative paths; the empty path is the volume root
/// and always exists. Every trait call bumps an operation counter so tests
/// can assert that a code path stayed local.
#[derive(Debug)]
pub struct MemoryConnector {
    entries: RwLock<BTreeMap<PathBuf, Entry>>,
    ops: AtomicUsize,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    /// Create an empty namespace.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            PathBuf::new(),
            Entry {
                kind: EntryKind::Directory,
                mtime: SystemTime::now(),
            },
        );
        Self {
            entries: RwLock::new(entries),
            ops: AtomicUsize::new(0),
        }
    }

    /// Seed a top-level directory without counting an operation.
    pub fn with_dir(self, name: &str) -> Self {
        self.insert(name, EntryKind::Directory);
        self
    }

    /// Seed a top-level regular file without counting an operation.
    pub fn with_file(self, name: &str) -> Self {
        self.insert(name, EntryKind::File);
        self
    }

    /// Number of connector operations performed so far.
    pub fn op_count(&self) -> usize {
        self.ops.load(Ordering::SeqCst)
    }

    fn insert(&self, path: &str, kind: EntryKind) {
        self.entries.write().insert(
            Self::normalize(Path::new(path)),
            Entry {
                kind,
                mtime: SystemTime::now(),
            },
        );
    }

    /// Normalize a path: drop the root, `.` components and resolve `..`.
    fn normalize(path: &Path) -> PathBuf {
        let mut result = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(s) => result.push(s),
                Component::ParentDir => {
                    result.pop();
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        result
    }

    fn count(&self) {
        self.ops.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn create_dir(&self, path: &Path) -> ConnectorResult<()> {
        self.count();
        let key = Self::normalize(path);
        let display = path.display().to_string();
        let mut entries = self.entries.write();

        if entries.contains_key(&key) {
            return Err(ConnectorError::already_exists(display));
        }
        let parent = key.parent().map(Path::to_path_buf).unwrap_or_default();
        match entries.get(&parent) {
            Some(e) if e.kind.is_dir() => {}
            Some(_) => return Err(ConnectorError::not_a_directory(display)),
            None => return Err(ConnectorError::not_found(display)),
        }

        entries.insert(
            key,
            Entry {
                kind: EntryKind::Directory,
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }

    async fn list_dir(&self, path: &Path) -> ConnectorResult<Vec<DirEntry>> {
        self.count();
        let key = Self::normalize(path);
        let entries = self.entries.read();

        match entries.get(&key) {
            Some(e) if e.kind.is_dir() => {}
            Some(_) => return Err(ConnectorError::not_a_directory(path.display().to_string())),
            None => return Err(ConnectorError::not_found(path.display().to_string())),
        }

        Ok(entries
            .iter()
            .filter(|(p, _)| !p.as_os_str().is_empty() && p.parent() == Some(key.as_path()))
            .map(|(p, e)| DirEntry {
                name: p
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                kind: e.kind,
            })
            .collect())
    }

    async fn stat_dir(&self, path: &Path) -> ConnectorResult<EntryStat> {
        self.count();
        let key = Self::normalize(path);
        let entries = self.entries.read();

        entries
            .get(&key)
            .map(|e| EntryStat {
                name: key
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                kind: e.kind,
                mtime: e.mtime,
            })
            .ok_or_else(|| ConnectorError::not_found(path.display().to_string()))
    }

    async fn remove_tree(&self, path: &Path) -> ConnectorResult<()> {
        self.count();
        let key = Self::normalize(path);
        let display = path.display().to_string();
        if key.as_os_str().is_empty() {
            return Err(ConnectorError::other("refusing to remove the volume root"));
        }

        let mut entries = self.entries.write();
        match entries.get(&key) {
            Some(e) if e.kind.is_dir() => {}
            Some(_) => return Err(ConnectorError::not_a_directory(display)),
            None => return Err(ConnectorError::not_found(display)),
        }

        entries.retain(|p, _| !p.starts_with(&key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_list_stat() {
        let connector = MemoryConnector::new();
        connector.create_dir(Path::new("/vol1")).await.unwrap();
        connector.create_dir(Path::new("/vol1/inner")).await.unwrap();

        let entries = connector.list_dir(Path::new(".")).await.unwrap();
        assert_eq!(
            entries,
            vec![DirEntry {
                name: "vol1".into(),
                kind: EntryKind::Directory
            }]
        );

        let stat = connector.stat_dir(Path::new("/vol1")).await.unwrap();
        assert_eq!(stat.name, "vol1");
        assert!(stat.is_dir());
        assert_eq!(connector.op_count(), 4);
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let connector = MemoryConnector::new();
        let result = connector.create_dir(Path::new("/a/b")).await;
        assert!(matches!(result, Err(ConnectorError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_tree_drops_descendants() {
        let connector = MemoryConnector::new().with_dir("vol1").with_dir("vol10");
        connector.create_dir(Path::new("/vol1/nested")).await.unwrap();

        connector.remove_tree(Path::new("/vol1")).await.unwrap();

        let names: Vec<_> = connector
            .list_dir(Path::new("."))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["vol10"]);
        assert!(connector.stat_dir(Path::new("/vol1/nested")).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_missing() {
        let connector = MemoryConnector::new();
        let result = connector.remove_tree(Path::new("/ghost")).await;
        assert!(matches!(result, Err(ConnectorError::NotFound(_))));
    }
}
