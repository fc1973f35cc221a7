//! Helper-process executor.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use super::{ExecutorError, HelperKind, MountExecutor, MountRequest};

/// Program names (or absolute paths) of the helpers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperPrograms {
    pub glusterfs: String,
    pub mount: String,
    pub umount: String,
}

impl Default for HelperPrograms {
    fn default() -> Self {
        Self {
            glusterfs: "glusterfs".to_string(),
            mount: "mount".to_string(),
            umount: "umount".to_string(),
        }
    }
}

/// A fully built helper command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperInvocation {
    pub program: String,
    pub args: Vec<OsString>,
}

/// Executor that runs the Gluster mount helpers as child processes.
#[derive(Debug, Clone)]
pub struct HelperExecutor {
    kind: HelperKind,
    volume: String,
    servers: Vec<String>,
    programs: HelperPrograms,
}

impl HelperExecutor {
    /// Create an executor for the Gluster volume `volume` served by `servers`.
    pub fn new(
        kind: HelperKind,
        volume: impl Into<String>,
        servers: Vec<String>,
        programs: HelperPrograms,
    ) -> Self {
        Self {
            kind,
            volume: volume.into(),
            servers,
            programs,
        }
    }

    /// Build the command line for a mount.
    pub fn mount_invocation(&self, request: &MountRequest) -> Result<HelperInvocation, ExecutorError> {
        if self.servers.is_empty() {
            return Err(ExecutorError::NoServers(self.kind));
        }

        let invocation = match self.kind {
            HelperKind::Glusterfs => {
                let mut args: Vec<OsString> = Vec::new();
                for server in &self.servers {
                    args.push("--volfile-server".into());
                    args.push(server.into());
                }
                args.push("--volfile-id".into());
                args.push((&self.volume).into());
                if !request.is_whole_volume() {
                    args.push("--subdir-mount".into());
                    args.push(request.subdir.clone().into_os_string());
                }
                args.push(request.mountpoint.clone().into_os_string());
                HelperInvocation {
                    program: self.programs.glusterfs.clone(),
                    args,
                }
            }
            HelperKind::Mount => {
                let server = self
                    .servers
                    .choose(&mut rand::thread_rng())
                    .ok_or(ExecutorError::NoServers(self.kind))?;
                let mut source = format!("{}:/{}", server, self.volume);
                if !request.is_whole_volume() {
                    source.push_str(&request.subdir.to_string_lossy());
                }
                HelperInvocation {
                    program: self.programs.mount.clone(),
                    args: vec![
                        "-t".into(),
                        "glusterfs".into(),
                        source.into(),
                        request.mountpoint.clone().into_os_string(),
                    ],
                }
            }
        };
        Ok(invocation)
    }

    /// Build the command line for an unmount.
    pub fn unmount_invocation(&self, mountpoint: &Path) -> HelperInvocation {
        HelperInvocation {
            program: self.programs.umount.clone(),
            args: vec![mountpoint.as_os_str().to_os_string()],
        }
    }

    /// Run a helper to completion, turning a non-zero exit into an error
    /// carrying its combined output.
    async fn run(invocation: HelperInvocation) -> Result<(), ExecutorError> {
        info!(program = %invocation.program, args = ?invocation.args, "Executing helper");

        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ExecutorError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        if output.status.success() {
            debug!(program = %invocation.program, "Helper finished");
            return Ok(());
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Err(ExecutorError::Failed {
            program: invocation.program,
            status: output.status.to_string(),
            output: combined.trim().to_string(),
        })
    }
}

#[async_trait]
impl MountExecutor for HelperExecutor {
    async fn mount(&self, request: &MountRequest) -> Result<(), ExecutorError> {
        Self::run(self.mount_invocation(request)?).await
    }

    async fn unmount(&self, mountpoint: &Path) -> Result<(), ExecutorError> {
        Self::run(self.unmount_invocation(mountpoint)).await
    }
}
