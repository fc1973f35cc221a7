//! glustervol binary
//!
//! Docker volume plugin serving directories of one GlusterFS volume.
//!
//! ## Usage
//!
//! ```bash
//! GFS_VOLUME=gv0 GFS_SERVERS=gfs1,gfs2 glustervol
//! glustervol --config /etc/glustervol.toml --socket /run/docker/plugins/glusterfs.sock
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use glustervol_kernel::{
    BucketConnector, Connector, ConnectorKind, HelperExecutor, HelperKind, LocalConnector,
    MemoryConnector, MountExecutor, MountOrchestrator, MountRequest, PluginConfig, Scope,
    VolumeDriver,
};
use glustervol_server::PluginServer;
use glustervol_server::constants::DEFAULT_SOCKET_PATH;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// GlusterFS volume plugin for Docker
#[derive(Parser, Debug)]
#[command(name = "glustervol", version, about)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "GLUSTERVOL_CONFIG")]
    config: Option<PathBuf>,

    /// Gluster volume holding the plugin volumes
    #[arg(long, env = "GFS_VOLUME")]
    volume: Option<String>,

    /// Comma-separated volfile servers
    #[arg(long, env = "GFS_SERVERS")]
    servers: Option<String>,

    /// Directory for per-volume mountpoints
    #[arg(long, env = "GFS_ROOT")]
    root: Option<PathBuf>,

    /// Volume scope reported to Docker (global or local)
    #[arg(long)]
    scope: Option<Scope>,

    /// List dot-prefixed directories as volumes
    #[arg(long)]
    show_hidden: bool,

    /// Mount helper (glusterfs or mount)
    #[arg(long)]
    helper: Option<HelperKind>,

    /// Remote namespace access (staged, local, memory or buckets)
    #[arg(long)]
    connector: Option<ConnectorKind>,

    /// Tree served by the local connector
    #[arg(long)]
    volume_root: Option<PathBuf>,

    /// Mountpoint of the whole-volume mount used by the staged connector
    #[arg(long)]
    staging: Option<PathBuf>,

    /// Plugin socket path
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Layer CLI flags and environment over the optional config file.
fn load_config(args: &Args) -> anyhow::Result<PluginConfig> {
    let mut config = match &args.config {
        Some(path) => PluginConfig::load(path)?,
        None => PluginConfig::default(),
    };

    if let Some(volume) = &args.volume {
        config.volume = volume.clone();
    }
    if let Some(servers) = &args.servers {
        config.servers = PluginConfig::parse_servers(servers);
    }
    if let Some(root) = &args.root {
        config.root = root.clone();
    }
    if let Some(scope) = args.scope {
        config.scope = scope;
    }
    if args.show_hidden {
        config.show_hidden = true;
    }
    if let Some(helper) = args.helper {
        config.helper = helper;
    }
    if let Some(connector) = args.connector {
        config.connector = connector;
    }
    if let Some(volume_root) = &args.volume_root {
        config.volume_root = Some(volume_root.clone());
    }
    if let Some(staging) = &args.staging {
        config.staging = staging.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    info!(
        volume = %config.volume,
        servers = ?config.servers,
        root = %config.root.display(),
        connector = %config.connector,
        helper = %config.helper,
        "Starting glustervol"
    );

    let executor = Arc::new(HelperExecutor::new(
        config.helper,
        config.volume.clone(),
        config.servers.clone(),
        config.programs.clone(),
    ));

    let (connector, staging) = build_connector(&config, &executor).await?;
    let driver = Arc::new(
        VolumeDriver::new(config.root.clone(), connector, executor.clone())
            .with_scope(config.scope)
            .with_show_hidden(config.show_hidden),
    );

    let served = match PluginServer::bind(args.socket.clone(), Arc::clone(&driver)).await {
        Ok(server) => server
            .serve(shutdown_signal())
            .await
            .context("plugin listener failed"),
        Err(e) => Err(e).with_context(|| format!("failed to bind {}", args.socket.display())),
    };

    let active = driver.active_mounts().await;
    if active > 0 {
        warn!(active, "Exiting with volumes still mounted");
    }
    if let Some(staging) = staging {
        match executor.unmount(&staging).await {
            Ok(()) => info!(mountpoint = %staging.display(), "Staging mount released"),
            Err(e) => warn!(mountpoint = %staging.display(), error = %e, "Failed to release staging mount"),
        }
    }

    served
}

/// Build the configured connector. Returns the staging mountpoint when one
/// was mounted, so it can be released on exit.
async fn build_connector(
    config: &PluginConfig,
    executor: &Arc<HelperExecutor>,
) -> anyhow::Result<(Arc<dyn Connector>, Option<PathBuf>)> {
    let built: (Arc<dyn Connector>, Option<PathBuf>) = match config.connector {
        ConnectorKind::Staged => {
            mount_staging(executor, &config.staging).await?;
            (
                Arc::new(LocalConnector::new(config.staging.clone())),
                Some(config.staging.clone()),
            )
        }
        ConnectorKind::Local => {
            let root = config
                .volume_root
                .clone()
                .context("the local connector needs volume_root")?;
            (Arc::new(LocalConnector::new(root)), None)
        }
        ConnectorKind::Memory => {
            warn!("Using the in-memory connector, volumes are not persisted");
            (Arc::new(MemoryConnector::new()), None)
        }
        ConnectorKind::Buckets => (Arc::new(BucketConnector::new(config.buckets.clone())), None),
    };
    info!(backend = built.0.backend(), "Connector ready");
    Ok(built)
}

/// Mount the whole Gluster volume at `staging`.
async fn mount_staging(executor: &Arc<HelperExecutor>, staging: &Path) -> anyhow::Result<()> {
    MountOrchestrator::new(executor.clone())
        .prepare_mountpoint(staging)
        .await
        .context("failed to prepare the staging mountpoint")?;

    executor
        .mount(&MountRequest::whole_volume(staging))
        .await
        .context("failed to mount the Gluster volume for staging")?;
    info!(mountpoint = %staging.display(), "Staging mount ready");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}
