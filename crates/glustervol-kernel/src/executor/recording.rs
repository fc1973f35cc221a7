//! In-process executor fake.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{ExecutorError, MountExecutor, MountRequest};

/// A call observed by [`RecordingExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Mount(MountRequest),
    Unmount(PathBuf),
}

/// Executor that records calls instead of touching the mount namespace.
///
/// Failures are queued with [`fail_next_mount`](Self::fail_next_mount) and
/// [`fail_next_unmount`](Self::fail_next_unmount) and consumed in order.
/// An optional latency is slept inside every call to widen race windows.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<Invocation>>,
    mount_failures: Mutex<VecDeque<String>>,
    unmount_failures: Mutex<VecDeque<String>>,
    latency: Option<Duration>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `latency` inside each call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next mount fail with `output` as the helper's output.
    pub fn fail_next_mount(&self, output: impl Into<String>) {
        self.mount_failures.lock().push_back(output.into());
    }

    /// Make the next unmount fail with `output` as the helper's output.
    pub fn fail_next_unmount(&self, output: impl Into<String>) {
        self.unmount_failures.lock().push_back(output.into());
    }

    /// Every call so far, in order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    pub fn mount_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, Invocation::Mount(_)))
            .count()
    }

    pub fn unmount_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, Invocation::Unmount(_)))
            .count()
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn failure(program: &str, output: String) -> ExecutorError {
        ExecutorError::Failed {
            program: program.to_string(),
            status: "exit status: 1".to_string(),
            output,
        }
    }
}

#[async_trait]
impl MountExecutor for RecordingExecutor {
    async fn mount(&self, request: &MountRequest) -> Result<(), ExecutorError> {
        self.calls.lock().push(Invocation::Mount(request.clone()));
        self.pause().await;

        let failure = self.mount_failures.lock().pop_front();
        match failure {
            Some(output) => Err(Self::failure("glusterfs", output)),
            None => Ok(()),
        }
    }

    async fn unmount(&self, mountpoint: &Path) -> Result<(), ExecutorError> {
        self.calls
            .lock()
            .push(Invocation::Unmount(mountpoint.to_path_buf()));
        self.pause().await;

        let failure = self.unmount_failures.lock().pop_front();
        match failure {
            Some(output) => Err(Self::failure("umount", output)),
            None => Ok(()),
        }
    }
}
