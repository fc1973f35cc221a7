//! Mount orchestration.
//!
//! Decides when a physical mount or unmount is needed and keeps the
//! registry in step with what is actually attached. The orchestrator owns
//! no state of its own: callers pass in the registry they hold the lock
//! for, and every executor call happens while that lock is held.

use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::connector::DEFAULT_DIR_MODE;
use crate::error::{PluginError, PluginResult};
use crate::executor::{MountExecutor, MountRequest};
use crate::registry::MountRegistry;

/// What `symlink_metadata` found at a local mountpoint.
#[derive(Debug)]
pub enum MountpointState {
    /// Nothing at the path.
    Missing,
    /// A directory, ready to mount over.
    Directory,
    /// Something other than a directory.
    Conflict,
    /// A dead mount is still in place: `ENOTCONN` or `ESTALE` from a FUSE
    /// client that went away, or `EIO` from one that is wedged.
    Stale(io::Error),
    /// Any other failure, e.g. `ENOTDIR` or `EACCES` somewhere on the path.
    Inaccessible(io::Error),
}

impl MountpointState {
    /// Classify the result of `symlink_metadata` on a mountpoint.
    pub fn classify(meta: io::Result<Metadata>) -> Self {
        match meta {
            Ok(meta) if meta.is_dir() => Self::Directory,
            Ok(_) => Self::Conflict,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::Missing,
            Err(e) if is_dead_mount(&e) => Self::Stale(e),
            Err(e) => Self::Inaccessible(e),
        }
    }

    /// Inspect `path` without following a final symlink.
    pub async fn inspect(path: &Path) -> Self {
        Self::classify(fs::symlink_metadata(path).await)
    }
}

const EIO: i32 = 5;

fn is_dead_mount(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotConnected | io::ErrorKind::StaleNetworkFileHandle
    ) || err.raw_os_error() == Some(EIO)
}

/// Physical mount lifecycle on top of a [`MountRegistry`].
#[derive(Clone)]
pub struct MountOrchestrator {
    executor: Arc<dyn MountExecutor>,
}

impl MountOrchestrator {
    pub fn new(executor: Arc<dyn MountExecutor>) -> Self {
        Self { executor }
    }

    /// Record an acquisition of `name` by `client`, mounting on first use.
    ///
    /// Returns the mountpoint. If preparing the mountpoint or running the
    /// mount helper fails, the acquisition is rolled back and the entry
    /// deleted before the error is returned.
    pub async fn ensure_mounted(
        &self,
        registry: &mut MountRegistry,
        name: &str,
        client: &str,
    ) -> PluginResult<PathBuf> {
        let (entry, first) = registry.acquire(name, client);
        let mountpoint = entry.mountpoint().to_path_buf();
        let connections = entry.connections();

        if !first {
            debug!(volume = %name, client = %client, connections, "Reusing active mount");
            return Ok(mountpoint);
        }

        let state = MountpointState::inspect(&mountpoint).await;
        self.attach_first(registry, name, client, mountpoint, state).await
    }

    /// Mount a freshly acquired entry whose mountpoint was found in `state`,
    /// deleting the entry if that fails.
    async fn attach_first(
        &self,
        registry: &mut MountRegistry,
        name: &str,
        client: &str,
        mountpoint: PathBuf,
        state: MountpointState,
    ) -> PluginResult<PathBuf> {
        if let Err(err) = self.attach(name, &mountpoint, state).await {
            registry.remove(name);
            error!(volume = %name, client = %client, error = %err, "Mount failed, acquisition rolled back");
            return Err(err);
        }

        info!(volume = %name, client = %client, mountpoint = %mountpoint.display(), "Volume mounted");
        Ok(mountpoint)
    }

    /// Drop an acquisition of `name` by `client`, unmounting after the last.
    ///
    /// The entry is removed before the unmount helper runs, so a failing
    /// helper is reported but never leaves a zero-connection entry behind.
    pub async fn ensure_unmounted(
        &self,
        registry: &mut MountRegistry,
        name: &str,
        client: &str,
    ) -> PluginResult<()> {
        let remaining = registry.release(name, client)?;
        if remaining > 0 {
            debug!(volume = %name, client = %client, remaining, "Mount still in use");
            return Ok(());
        }

        let mountpoint = registry
            .remove(name)
            .map(|entry| entry.mountpoint().to_path_buf())
            .unwrap_or_else(|| registry.mountpoint(name));

        if let Err(err) = self.executor.unmount(&mountpoint).await {
            error!(volume = %name, mountpoint = %mountpoint.display(), error = %err, "Unmount failed");
            return Err(err.into());
        }

        info!(volume = %name, client = %client, mountpoint = %mountpoint.display(), "Volume unmounted");
        Ok(())
    }

    /// Run the unmount helper on `mountpoint`, logging instead of failing.
    pub async fn unmount_best_effort(&self, mountpoint: &Path) {
        match self.executor.unmount(mountpoint).await {
            Ok(()) => info!(mountpoint = %mountpoint.display(), "Detached mount"),
            Err(err) => warn!(mountpoint = %mountpoint.display(), error = %err, "Best-effort unmount failed"),
        }
    }

    /// Make `mountpoint` ready to be mounted over.
    ///
    /// Creates it when missing, refuses non-directories and unmounts a
    /// dead mount left in place. A failed cleanup is logged and ignored.
    pub async fn prepare_mountpoint(&self, mountpoint: &Path) -> PluginResult<()> {
        let state = MountpointState::inspect(mountpoint).await;
        self.prepare_as(mountpoint, state).await
    }

    async fn prepare_as(&self, mountpoint: &Path, state: MountpointState) -> PluginResult<()> {
        match state {
            MountpointState::Missing => create_mountpoint(mountpoint).await,
            MountpointState::Directory => Ok(()),
            MountpointState::Conflict => Err(PluginError::path_conflict(mountpoint)),
            MountpointState::Stale(cause) => {
                warn!(mountpoint = %mountpoint.display(), error = %cause, "Stale mountpoint, unmounting first");
                self.unmount_best_effort(mountpoint).await;
                Ok(())
            }
            MountpointState::Inaccessible(cause) => Err(PluginError::io(mountpoint, cause)),
        }
    }

    async fn attach(&self, name: &str, mountpoint: &Path, state: MountpointState) -> PluginResult<()> {
        self.prepare_as(mountpoint, state).await?;
        self.executor
            .mount(&MountRequest::volume(name, mountpoint))
            .await?;
        Ok(())
    }
}

/// Create `path` and any missing parents with the plugin's directory mode.
async fn create_mountpoint(path: &Path) -> PluginResult<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true).mode(DEFAULT_DIR_MODE);
    builder
        .create(path)
        .await
        .map_err(|e| PluginError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Invocation, RecordingExecutor};
    use crate::registry::RegistryError;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        exec: Arc<RecordingExecutor>,
        orch: MountOrchestrator,
        registry: MountRegistry,
    }

    fn setup_with(exec: RecordingExecutor) -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("volumes");
        let exec = Arc::new(exec);
        Fixture {
            registry: MountRegistry::new(&root),
            orch: MountOrchestrator::new(exec.clone()),
            exec,
            root,
            _dir: dir,
        }
    }

    fn setup() -> Fixture {
        setup_with(RecordingExecutor::new())
    }

    #[test]
    fn test_classify_metadata_results() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();

        assert!(matches!(
            MountpointState::classify(std::fs::symlink_metadata(dir.path())),
            MountpointState::Directory
        ));
        assert!(matches!(
            MountpointState::classify(std::fs::symlink_metadata(&file)),
            MountpointState::Conflict
        ));
        assert!(matches!(
            MountpointState::classify(std::fs::symlink_metadata(dir.path().join("absent"))),
            MountpointState::Missing
        ));
        // ENOTCONN, ESTALE and EIO come from dead FUSE mounts.
        for errno in [107, 116, 5] {
            assert!(matches!(
                MountpointState::classify(Err(io::Error::from_raw_os_error(errno))),
                MountpointState::Stale(_)
            ));
        }
        // ENOTDIR, EACCES
        for errno in [20, 13] {
            assert!(matches!(
                MountpointState::classify(Err(io::Error::from_raw_os_error(errno))),
                MountpointState::Inaccessible(_)
            ));
        }
    }

    #[tokio::test]
    async fn test_stale_mountpoint_is_unmounted_before_mount() {
        let mut fx = setup();
        fx.exec.fail_next_unmount("not mounted");
        let mp = fx.root.join("vol");
        fx.registry.acquire("vol", "A");

        let stale = MountpointState::Stale(io::Error::from_raw_os_error(107));
        let got = fx
            .orch
            .attach_first(&mut fx.registry, "vol", "A", mp.clone(), stale)
            .await
            .unwrap();
        assert_eq!(got, mp);
        assert_eq!(
            fx.exec.invocations(),
            vec![
                Invocation::Unmount(mp.clone()),
                Invocation::Mount(MountRequest::volume("vol", &mp)),
            ]
        );
        assert_eq!(fx.registry.lookup("vol").unwrap().connections(), 1);
    }

    #[tokio::test]
    async fn test_stale_cleanup_then_mount_failure_rolls_back() {
        let mut fx = setup();
        fx.exec.fail_next_mount("Mount failed");
        let mp = fx.root.join("vol");
        fx.registry.acquire("vol", "A");

        let stale = MountpointState::Stale(io::Error::from_raw_os_error(116));
        fx.orch
            .attach_first(&mut fx.registry, "vol", "A", mp.clone(), stale)
            .await
            .unwrap_err();
        assert_eq!(fx.exec.unmount_count(), 1);
        assert!(fx.registry.is_empty());
    }

    #[tokio::test]
    async fn test_inaccessible_mountpoint_is_never_mounted() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("rootfile");
        std::fs::write(&root, b"not a dir").unwrap();
        let exec = Arc::new(RecordingExecutor::new());
        let orch = MountOrchestrator::new(exec.clone());
        let mut registry = MountRegistry::new(&root);

        let err = orch.ensure_mounted(&mut registry, "vol", "A").await.unwrap_err();
        assert!(matches!(err, PluginError::Io { .. }));
        assert!(exec.invocations().is_empty());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_prepare_mountpoint_outside_registry() {
        let fx = setup();
        let staging = fx.root.join("staging");

        fx.orch.prepare_mountpoint(&staging).await.unwrap();
        assert!(staging.is_dir());
        fx.orch.prepare_mountpoint(&staging).await.unwrap();

        let file = fx.root.join("plain");
        std::fs::write(&file, b"x").unwrap();
        let err = fx.orch.prepare_mountpoint(&file).await.unwrap_err();
        assert!(matches!(err, PluginError::PathConflict(_)));
        assert!(fx.exec.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_first_mount_creates_mountpoint() {
        let mut fx = setup();

        let mp = fx.orch.ensure_mounted(&mut fx.registry, "vol1", "A").await.unwrap();
        assert_eq!(mp, fx.root.join("vol1"));
        assert!(mp.is_dir());
        assert_eq!(
            fx.exec.invocations(),
            vec![Invocation::Mount(MountRequest::volume("vol1", &mp))]
        );
    }

    #[tokio::test]
    async fn test_vol1_two_clients_scenario() {
        let mut fx = setup();

        let mp_a = fx.orch.ensure_mounted(&mut fx.registry, "vol1", "A").await.unwrap();
        let mp_b = fx.orch.ensure_mounted(&mut fx.registry, "vol1", "B").await.unwrap();
        assert_eq!(mp_a, mp_b);
        assert_eq!(fx.exec.mount_count(), 1);
        assert_eq!(fx.registry.lookup("vol1").unwrap().connections(), 2);

        fx.orch.ensure_unmounted(&mut fx.registry, "vol1", "A").await.unwrap();
        assert_eq!(fx.exec.unmount_count(), 0);
        assert_eq!(fx.registry.lookup("vol1").unwrap().connections(), 1);

        fx.orch.ensure_unmounted(&mut fx.registry, "vol1", "B").await.unwrap();
        assert_eq!(fx.exec.unmount_count(), 1);
        assert!(fx.registry.lookup("vol1").is_none());

        let err = fx
            .orch
            .ensure_unmounted(&mut fx.registry, "vol1", "A")
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Registry(RegistryError::NotFound(_))));
        assert_eq!(fx.exec.unmount_count(), 1);
    }

    #[tokio::test]
    async fn test_existing_directory_is_reused() {
        let mut fx = setup();
        std::fs::create_dir_all(fx.root.join("vol1")).unwrap();

        fx.orch.ensure_mounted(&mut fx.registry, "vol1", "A").await.unwrap();
        assert_eq!(fx.exec.mount_count(), 1);
    }

    #[tokio::test]
    async fn test_plain_file_is_a_path_conflict() {
        let mut fx = setup();
        std::fs::create_dir_all(&fx.root).unwrap();
        std::fs::write(fx.root.join("vol2"), b"not a dir").unwrap();

        let err = fx
            .orch
            .ensure_mounted(&mut fx.registry, "vol2", "A")
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::PathConflict(_)));
        assert!(fx.exec.invocations().is_empty());
        assert!(fx.registry.lookup("vol2").is_none());
    }

    #[tokio::test]
    async fn test_mount_failure_rolls_back() {
        let mut fx = setup();
        fx.exec.fail_next_mount("transport endpoint is not connected");

        let err = fx
            .orch
            .ensure_mounted(&mut fx.registry, "vol1", "A")
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Executor(_)));
        assert!(err.to_string().contains("transport endpoint"));
        assert!(fx.registry.is_empty());

        // Next attempt starts from scratch and mounts again.
        fx.orch.ensure_mounted(&mut fx.registry, "vol1", "A").await.unwrap();
        assert_eq!(fx.exec.mount_count(), 2);
        assert_eq!(fx.registry.lookup("vol1").unwrap().connections(), 1);
    }

    #[tokio::test]
    async fn test_unmount_failure_still_removes_entry() {
        let mut fx = setup();
        fx.orch.ensure_mounted(&mut fx.registry, "vol1", "A").await.unwrap();
        fx.exec.fail_next_unmount("target is busy");

        let err = fx
            .orch
            .ensure_unmounted(&mut fx.registry, "vol1", "A")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("target is busy"));
        assert!(fx.registry.lookup("vol1").is_none());
    }

    #[tokio::test]
    async fn test_unknown_client_leaves_mount_alone() {
        let mut fx = setup();
        fx.orch.ensure_mounted(&mut fx.registry, "vol1", "A").await.unwrap();

        let err = fx
            .orch
            .ensure_unmounted(&mut fx.registry, "vol1", "B")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "mount vol1 does not know about client ID: B");
        assert_eq!(fx.registry.lookup("vol1").unwrap().connections(), 1);
        assert_eq!(fx.exec.unmount_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mounts_attach_once() {
        let fx = setup_with(RecordingExecutor::new().with_latency(Duration::from_millis(20)));
        let registry = Arc::new(Mutex::new(fx.registry));
        let orch = fx.orch.clone();

        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            let orch = orch.clone();
            handles.push(tokio::spawn(async move {
                let mut reg = registry.lock().await;
                orch.ensure_mounted(&mut reg, "shared", &format!("client-{i}")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(fx.exec.mount_count(), 1);
        assert_eq!(registry.lock().await.lookup("shared").unwrap().connections(), 16);

        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            let orch = orch.clone();
            handles.push(tokio::spawn(async move {
                let mut reg = registry.lock().await;
                orch.ensure_unmounted(&mut reg, "shared", &format!("client-{i}")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(fx.exec.unmount_count(), 1);
        assert!(registry.lock().await.is_empty());
    }
}
