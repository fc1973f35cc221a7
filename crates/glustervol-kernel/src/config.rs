//! Plugin configuration.
//!
//! Loaded from an optional TOML file; the server binary then applies CLI
//! flags and environment variables on top before calling
//! [`PluginConfig::validate`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::driver::Scope;
use crate::executor::{HelperKind, HelperPrograms};

/// Default directory that holds per-volume mountpoints.
pub const DEFAULT_ROOT: &str = "/mnt/volumes";

/// Default mountpoint of the whole-volume staging mount.
pub const DEFAULT_STAGING: &str = "/run/glustervol/volume";

/// Where the driver reaches the remote volume namespace.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectorKind {
    /// Mount the whole volume at `staging` on startup and work inside it.
    #[default]
    Staged,
    /// Use an already reachable tree at `volume_root`.
    Local,
    /// In-memory namespace for dry runs. Mounts still use the helper.
    Memory,
    /// Object-storage variant with a fixed bucket list.
    Buckets,
}

/// Error loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Complete plugin configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Name of the Gluster volume that holds every plugin volume.
    pub volume: String,
    /// Volfile servers, tried in order by the FUSE client.
    pub servers: Vec<String>,
    /// Local directory for per-volume mountpoints.
    pub root: PathBuf,
    pub scope: Scope,
    /// List dot-prefixed directories as volumes.
    pub show_hidden: bool,
    pub helper: HelperKind,
    pub programs: HelperPrograms,
    pub connector: ConnectorKind,
    /// Tree served by the `local` connector.
    pub volume_root: Option<PathBuf>,
    /// Mountpoint for the `staged` connector's whole-volume mount.
    pub staging: PathBuf,
    /// Bucket names served by the `buckets` connector.
    pub buckets: Vec<String>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            volume: String::new(),
            servers: Vec::new(),
            root: PathBuf::from(DEFAULT_ROOT),
            scope: Scope::default(),
            show_hidden: false,
            helper: HelperKind::default(),
            programs: HelperPrograms::default(),
            connector: ConnectorKind::default(),
            volume_root: None,
            staging: PathBuf::from(DEFAULT_STAGING),
            buckets: Vec::new(),
        }
    }
}

impl PluginConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Split a comma-separated server list, dropping blanks.
    pub fn parse_servers(csv: &str) -> Vec<String> {
        csv.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    /// Check the merged configuration before anything is started.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.volume.trim().is_empty() {
            return Err(ConfigError::invalid("volume must be set (GFS_VOLUME)"));
        }
        if !self.root.is_absolute() {
            return Err(ConfigError::invalid(format!(
                "root must be an absolute path, got {}",
                self.root.display()
            )));
        }
        if self.servers.is_empty() && self.needs_servers() {
            return Err(ConfigError::invalid(format!(
                "the {} connector needs at least one server (GFS_SERVERS)",
                self.connector
            )));
        }
        match self.connector {
            ConnectorKind::Local if self.volume_root.is_none() => {
                return Err(ConfigError::invalid("the local connector needs volume_root"));
            }
            ConnectorKind::Staged if !self.staging.is_absolute() => {
                return Err(ConfigError::invalid("staging must be an absolute path"));
            }
            _ => {}
        }
        Ok(())
    }

    /// Whether startup must fail without a server list.
    ///
    /// The in-memory connector can start without servers; its mounts then
    /// fail with a helper error instead.
    pub fn needs_servers(&self) -> bool {
        self.connector != ConnectorKind::Memory
    }
}
