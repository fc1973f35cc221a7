//! Object-storage connector.
//!
//! Buckets are provisioned outside the plugin, so this backend only knows
//! the configured bucket names. It can list and stat them; creating or
//! removing a bucket through the plugin is rejected.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Component, Path};
use std::time::SystemTime;

use super::error::{ConnectorError, ConnectorResult};
use super::{Connector, DirEntry, EntryKind, EntryStat};

const BACKEND: &str = "bucket";

/// Connector over a fixed set of object-storage buckets.
#[derive(Debug, Clone)]
pub struct BucketConnector {
    buckets: BTreeSet<String>,
    registered_at: SystemTime,
}

impl BucketConnector {
    pub fn new<I, S>(buckets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            buckets: buckets.into_iter().map(Into::into).collect(),
            registered_at: SystemTime::now(),
        }
    }

    /// The bucket named by a volume-rooted path, if it is a single component.
    fn bucket_name(path: &Path) -> Option<String> {
        let mut normal = path.components().filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        });
        let first = normal.next()?;
        normal.next().is_none().then_some(first)
    }

    fn is_root(path: &Path) -> bool {
        path.components()
            .all(|c| matches!(c, Component::RootDir | Component::CurDir))
    }
}

#[async_trait]
impl Connector for BucketConnector {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn create_dir(&self, _path: &Path) -> ConnectorResult<()> {
        Err(ConnectorError::unsupported("create", BACKEND))
    }

    async fn list_dir(&self, path: &Path) -> ConnectorResult<Vec<DirEntry>> {
        if !Self::is_root(path) {
            return Err(ConnectorError::unsupported("listing inside a bucket", BACKEND));
        }
        Ok(self
            .buckets
            .iter()
            .map(|name| DirEntry {
                name: name.clone(),
                kind: EntryKind::Directory,
            })
            .collect())
    }

    async fn stat_dir(&self, path: &Path) -> ConnectorResult<EntryStat> {
        match Self::bucket_name(path) {
            Some(name) if self.buckets.contains(&name) => Ok(EntryStat {
                name,
                kind: EntryKind::Directory,
                mtime: self.registered_at,
            }),
            _ => Err(ConnectorError::not_found(path.display().to_string())),
        }
    }

    async fn remove_tree(&self, _path: &Path) -> ConnectorResult<()> {
        Err(ConnectorError::unsupported("remove", BACKEND))
    }
}
