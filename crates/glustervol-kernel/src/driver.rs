//! Volume driver: the operations behind the plugin protocol.
//!
//! [`VolumeDriver`] is the single entry point the server dispatches to.
//! Every operation takes the registry lock for its full duration, connector
//! and helper calls included, so all requests are serialized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::connector::Connector;
use crate::error::{PluginError, PluginResult};
use crate::executor::MountExecutor;
use crate::orchestrator::MountOrchestrator;
use crate::registry::MountRegistry;

/// Visibility of volumes across hosts, reported by `Capabilities`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Scope {
    /// Volumes are cluster-wide; any host sees the same data.
    #[default]
    Global,
    /// Volumes are private to this host.
    Local,
}

/// Live mount statistics for an active volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VolumeStatus {
    pub connections: usize,
    pub clients: usize,
}

/// Result of [`VolumeDriver::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Set only while the volume is mounted.
    pub mountpoint: Option<PathBuf>,
    pub status: Option<VolumeStatus>,
}

/// One row of [`VolumeDriver::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSummary {
    pub name: String,
    pub mountpoint: Option<PathBuf>,
}

/// Check that `name` is a single plain path component.
pub fn validate_name(name: &str) -> PluginResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\0');
    if bad {
        return Err(PluginError::invalid_name(name));
    }
    Ok(())
}

/// Path of a volume's directory, rooted at the remote volume.
fn remote_path(name: &str) -> PathBuf {
    Path::new("/").join(name)
}

/// Docker volume driver over a Gluster volume.
pub struct VolumeDriver {
    registry: Mutex<MountRegistry>,
    orchestrator: MountOrchestrator,
    connector: Arc<dyn Connector>,
    scope: Scope,
    show_hidden: bool,
}

impl VolumeDriver {
    /// Create a driver mounting volumes under `root`.
    pub fn new(
        root: impl Into<PathBuf>,
        connector: Arc<dyn Connector>,
        executor: Arc<dyn MountExecutor>,
    ) -> Self {
        Self {
            registry: Mutex::new(MountRegistry::new(root)),
            orchestrator: MountOrchestrator::new(executor),
            connector,
            scope: Scope::default(),
            show_hidden: false,
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Include dot-prefixed directories in [`list`](Self::list).
    pub fn with_show_hidden(mut self, show_hidden: bool) -> Self {
        self.show_hidden = show_hidden;
        self
    }

    /// Create the remote directory for a new volume.
    ///
    /// Driver options have no effect on a directory-backed volume; they are
    /// only logged.
    pub async fn create(&self, name: &str, options: &BTreeMap<String, String>) -> PluginResult<()> {
        validate_name(name)?;
        let _registry = self.registry.lock().await;

        if !options.is_empty() {
            debug!(volume = %name, ?options, "Ignoring volume options");
        }
        self.connector.create_dir(&remote_path(name)).await?;
        info!(volume = %name, backend = self.connector.backend(), "Volume created");
        Ok(())
    }

    /// List the volumes on the remote volume root.
    pub async fn list(&self) -> PluginResult<Vec<VolumeSummary>> {
        let registry = self.registry.lock().await;
        let entries = self.connector.list_dir(Path::new(".")).await?;

        Ok(entries
            .into_iter()
            .filter(|e| e.is_dir() && (self.show_hidden || !e.name.starts_with('.')))
            .map(|e| VolumeSummary {
                mountpoint: registry
                    .lookup(&e.name)
                    .map(|entry| entry.mountpoint().to_path_buf()),
                name: e.name,
            })
            .collect())
    }

    /// Describe one volume.
    ///
    /// An active mount is answered from the registry alone. Otherwise the
    /// remote directory is stat'ed and its modification time reported as
    /// the creation time.
    pub async fn get(&self, name: &str) -> PluginResult<VolumeInfo> {
        validate_name(name)?;
        let registry = self.registry.lock().await;

        if let Some(entry) = registry.lookup(name) {
            return Ok(VolumeInfo {
                name: entry.name().to_string(),
                created_at: entry.created_at(),
                mountpoint: Some(entry.mountpoint().to_path_buf()),
                status: Some(VolumeStatus {
                    connections: entry.connections(),
                    clients: entry.client_count(),
                }),
            });
        }

        let stat = self.connector.stat_dir(&remote_path(name)).await?;
        if !stat.is_dir() {
            return Err(PluginError::not_a_directory(name));
        }
        Ok(VolumeInfo {
            name: name.to_string(),
            created_at: DateTime::<Utc>::from(stat.mtime),
            mountpoint: None,
            status: None,
        })
    }

    /// Delete a volume's remote directory tree.
    ///
    /// Any registry entry for the volume is dropped afterwards, even if
    /// clients still hold it; a still-attached mount is detached
    /// best-effort.
    pub async fn remove(&self, name: &str) -> PluginResult<()> {
        validate_name(name)?;
        let mut registry = self.registry.lock().await;

        self.connector.remove_tree(&remote_path(name)).await?;
        info!(volume = %name, "Volume removed");

        if let Some(entry) = registry.remove(name) {
            if entry.connections() > 0 {
                warn!(
                    volume = %name,
                    connections = entry.connections(),
                    "Removed volume was still mounted, dropping its mount"
                );
                self.orchestrator.unmount_best_effort(entry.mountpoint()).await;
            }
        }
        Ok(())
    }

    /// Mountpoint of a currently mounted volume.
    pub async fn path(&self, name: &str) -> PluginResult<PathBuf> {
        validate_name(name)?;
        let registry = self.registry.lock().await;

        registry
            .lookup(name)
            .filter(|entry| entry.connections() > 0)
            .map(|entry| entry.mountpoint().to_path_buf())
            .ok_or_else(|| PluginError::not_mounted(name))
    }

    /// Acquire `name` for `client`, mounting it if this is the first user.
    pub async fn mount(&self, name: &str, client: &str) -> PluginResult<PathBuf> {
        validate_name(name)?;
        let mut registry = self.registry.lock().await;
        self.orchestrator
            .ensure_mounted(&mut registry, name, client)
            .await
    }

    /// Release `client`'s hold on `name`, unmounting after the last user.
    pub async fn unmount(&self, name: &str, client: &str) -> PluginResult<()> {
        validate_name(name)?;
        let mut registry = self.registry.lock().await;
        self.orchestrator
            .ensure_unmounted(&mut registry, name, client)
            .await
    }

    pub fn capabilities(&self) -> Scope {
        self.scope
    }

    /// Number of volumes with an active registry entry.
    pub async fn active_mounts(&self) -> usize {
        self.registry.lock().await.len()
    }
}
