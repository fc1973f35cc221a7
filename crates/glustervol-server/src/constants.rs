//! Server configuration constants.

/// Socket Docker discovers the plugin on.
pub const DEFAULT_SOCKET_PATH: &str = "/run/docker/plugins/glusterfs.sock";

/// Content type of every plugin response.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.2+json";

/// Largest request body accepted (1 MiB).
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Per-connection read buffer limit, which bounds the request head.
pub const MAX_HEADER_SIZE: usize = 16 * 1024;

/// Plugin subsystems reported by `/Plugin.Activate`.
pub const IMPLEMENTS: &[&str] = &["VolumeDriver"];
