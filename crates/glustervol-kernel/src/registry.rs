//! Mount registry: which volumes are attached, and for whom.
//!
//! The registry is plain data. It is only ever reached through the
//! driver's process-wide lock, so every method takes `&self`/`&mut self`
//! and none of them synchronize internally.
//!
//! Between operations:
//! - `connections` equals the sum of the per-client counts
//! - an entry exists only while some client holds an acquisition
//! - an entry's mountpoint is `root/name` and never changes

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Misuse of the acquire/release protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No entry for this volume.
    #[error("volume not found in active mounts: {0}")]
    NotFound(String),

    /// Entry exists but has no connections left to release.
    #[error("mount has no active connections: {0}")]
    NoConnections(String),

    /// The client never acquired this volume.
    #[error("mount {name} does not know about client ID: {client}")]
    UnknownClient { name: String, client: String },
}

/// Mount state of one volume.
#[derive(Debug, Clone)]
pub struct MountEntry {
    name: String,
    mountpoint: PathBuf,
    connections: usize,
    clients: HashMap<String, usize>,
    created_at: DateTime<Utc>,
}

impl MountEntry {
    fn new(name: &str, mountpoint: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            mountpoint,
            connections: 0,
            clients: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Total acquisitions across all clients.
    pub fn connections(&self) -> usize {
        self.connections
    }

    /// Number of distinct clients holding the volume.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Acquisitions held by one client (0 if unknown).
    pub fn client_refs(&self, client: &str) -> usize {
        self.clients.get(client).copied().unwrap_or(0)
    }

    /// When this entry was first created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// In-memory table of active mounts, keyed by volume name.
#[derive(Debug)]
pub struct MountRegistry {
    root: PathBuf,
    mounts: BTreeMap<String, MountEntry>,
}

impl MountRegistry {
    /// Create an empty registry placing mountpoints under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mounts: BTreeMap::new(),
        }
    }

    /// Directory under which every mountpoint is created.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The mountpoint a volume has (or would have).
    pub fn mountpoint(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Record one acquisition of `name` by `client`.
    ///
    /// Creates the entry on first use. The returned flag is true when
    /// `connections` went from 0 to 1, i.e. a physical mount is needed.
    pub fn acquire(&mut self, name: &str, client: &str) -> (&MountEntry, bool) {
        let mountpoint = self.mountpoint(name);
        let entry = self
            .mounts
            .entry(name.to_string())
            .or_insert_with(|| MountEntry::new(name, mountpoint));

        let first = entry.connections == 0;
        *entry.clients.entry(client.to_string()).or_insert(0) += 1;
        entry.connections += 1;

        (&*entry, first)
    }

    /// Drop one acquisition of `name` by `client`.
    ///
    /// Returns the remaining connection count. The entry is left in place
    /// even at zero; the caller unmounts and then calls [`remove`](Self::remove).
    /// Nothing is mutated on error.
    pub fn release(&mut self, name: &str, client: &str) -> Result<usize, RegistryError> {
        let entry = self
            .mounts
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        if entry.connections == 0 {
            return Err(RegistryError::NoConnections(name.to_string()));
        }

        let refs = entry
            .clients
            .get_mut(client)
            .ok_or_else(|| RegistryError::UnknownClient {
                name: name.to_string(),
                client: client.to_string(),
            })?;

        *refs -= 1;
        if *refs == 0 {
            entry.clients.remove(client);
        }
        entry.connections -= 1;

        Ok(entry.connections)
    }

    /// Look up the entry for `name`.
    pub fn lookup(&self, name: &str) -> Option<&MountEntry> {
        self.mounts.get(name)
    }

    /// Copies of every entry, ordered by name.
    pub fn snapshot(&self) -> Vec<MountEntry> {
        self.mounts.values().cloned().collect()
    }

    /// Delete the entry for `name`, returning it.
    pub fn remove(&mut self, name: &str) -> Option<MountEntry> {
        self.mounts.remove(name)
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }
}
