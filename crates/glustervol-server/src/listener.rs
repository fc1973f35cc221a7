//! Unix socket listener for the plugin protocol.
//!
//! Docker connects to the plugin socket and sends HTTP/1.1 requests. Each
//! connection is served by hyper on its own task, with keep-alive.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use glustervol_kernel::VolumeDriver;
use hyper::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::constants::MAX_HEADER_SIZE;
use crate::protocol;

/// Plugin server bound to a Unix socket.
pub struct PluginServer {
    listener: UnixListener,
    socket_path: PathBuf,
    driver: Arc<VolumeDriver>,
}

impl PluginServer {
    /// Bind `socket_path`, replacing a stale socket left by a previous run.
    pub async fn bind(socket_path: impl Into<PathBuf>, driver: Arc<VolumeDriver>) -> io::Result<Self> {
        let socket_path = socket_path.into();

        if let Some(parent) = socket_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match tokio::fs::remove_file(&socket_path).await {
            Ok(()) => debug!(path = %socket_path.display(), "Removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let listener = UnixListener::bind(&socket_path)?;
        info!(path = %socket_path.display(), "Plugin socket listening");

        Ok(Self {
            listener,
            socket_path,
            driver,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until `shutdown` resolves, then remove the socket.
    ///
    /// Connections already being served keep running on their own tasks.
    pub async fn serve<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down plugin listener");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let driver = Arc::clone(&self.driver);
                        tokio::spawn(serve_connection(driver, stream));
                    }
                    Err(e) => {
                        warn!("Plugin accept error: {e}");
                    }
                },
            }
        }

        drop(self.listener);
        match tokio::fs::remove_file(&self.socket_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Serve requests on one connection until it closes.
async fn serve_connection(driver: Arc<VolumeDriver>, stream: UnixStream) {
    let service = service_fn(move |request: Request<Incoming>| {
        let driver = Arc::clone(&driver);
        async move { Ok::<_, Infallible>(protocol::handle_request(&driver, request).await) }
    });

    let served = http1::Builder::new()
        .max_buf_size(MAX_HEADER_SIZE)
        .serve_connection(TokioIo::new(stream), service)
        .await;
    if let Err(e) = served {
        debug!("Plugin connection error: {e}");
    }
}
