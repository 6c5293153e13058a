//! Server Core and Operator Surface
//!
//! `FileHubServer` owns the listener lifecycle and the collaborators shared
//! by every session. The operator surface is three operations: point the
//! server at a storage root, start on a port, stop.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::notifier::Notifier;
use super::registry::SessionRegistry;
use super::session::{self, SessionContext};
use crate::catalog::Catalog;
use crate::config::ServerConfig;
use crate::error::{FileHubError, FileHubResult};
use crate::logging::{OperatorLog, TracingLog};
use crate::store::FileStore;

/// Storage collaborators bound to one root directory
#[derive(Clone)]
struct SharedStorage {
    catalog: Arc<Catalog>,
    store: Arc<FileStore>,
}

/// State owned by one start/stop cycle
struct ServerRuntime {
    shutdown_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// The Filehub server
pub struct FileHubServer {
    config: ServerConfig,
    log: Arc<dyn OperatorLog>,
    registry: Arc<SessionRegistry>,
    storage: RwLock<Option<SharedStorage>>,
    runtime: Mutex<Option<ServerRuntime>>,
}

impl FileHubServer {
    /// Create a server logging operator events through `tracing`
    pub fn new(config: ServerConfig) -> Self {
        Self::with_logger(config, Arc::new(TracingLog))
    }

    /// Create a server with an injected operator log
    pub fn with_logger(config: ServerConfig, log: Arc<dyn OperatorLog>) -> Self {
        Self {
            config,
            log,
            registry: Arc::new(SessionRegistry::new()),
            storage: RwLock::new(None),
            runtime: Mutex::new(None),
        }
    }

    /// Point the server at a storage root and load the catalog from it.
    ///
    /// The directory must exist. Idempotent before `start`; rejected while
    /// the server is running.
    pub async fn set_root(&self, root: impl AsRef<Path>) -> FileHubResult<()> {
        if self.runtime.lock().await.is_some() {
            return Err(FileHubError::AlreadyRunning);
        }

        let root = root.as_ref();
        let meta = tokio::fs::metadata(root).await.map_err(|_| {
            FileHubError::Configuration {
                field: "storage root".to_string(),
                message: format!("{} does not exist", root.display()),
            }
        })?;
        if !meta.is_dir() {
            return Err(FileHubError::Configuration {
                field: "storage root".to_string(),
                message: format!("{} is not a directory", root.display()),
            });
        }

        let catalog = Catalog::load(root, self.log.clone()).await?;
        let store = FileStore::new(root, self.config.transfer_chunk_bytes);
        *self.storage.write().await = Some(SharedStorage {
            catalog: Arc::new(catalog),
            store: Arc::new(store),
        });

        self.log
            .log(&format!("File directory set to: {}", root.display()));
        Ok(())
    }

    /// Bind the listener and start accepting connections.
    ///
    /// Rejects if the server is already running or no storage root is set.
    /// Returns the bound address (useful to the operator console's display).
    pub async fn start(&self, port: u16) -> FileHubResult<SocketAddr> {
        if port == 0 {
            return Err(FileHubError::Configuration {
                field: "port".to_string(),
                message: "port must be between 1 and 65535".to_string(),
            });
        }

        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            return Err(FileHubError::AlreadyRunning);
        }
        let storage = self
            .storage
            .read()
            .await
            .clone()
            .ok_or(FileHubError::RootNotSet)?;

        let listener = TcpListener::bind((self.config.bind_address.as_str(), port))
            .await
            .map_err(|source| FileHubError::Transport { source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| FileHubError::Transport { source })?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(16);
        let ctx = Arc::new(SessionContext {
            config: self.config.clone(),
            catalog: storage.catalog,
            store: storage.store,
            registry: self.registry.clone(),
            notifier: Notifier::new(self.registry.clone()),
            log: self.log.clone(),
            shutdown: shutdown_tx.clone(),
        });
        let accept_task = tokio::spawn(accept_loop(listener, ctx, shutdown_rx));

        info!(%local_addr, "server started");
        self.log.log(&format!(
            "Server started on port {}. Waiting for connections...",
            local_addr.port()
        ));
        *runtime = Some(ServerRuntime {
            shutdown_tx,
            accept_task,
            local_addr,
        });
        Ok(local_addr)
    }

    /// Begin the shutdown sequence: stop accepting, signal every session to
    /// deliver its shutdown frame and close, clear the registry. Idempotent.
    pub async fn stop(&self) -> FileHubResult<()> {
        let runtime = self.runtime.lock().await.take();
        let Some(runtime) = runtime else {
            return Ok(());
        };

        let _ = runtime.shutdown_tx.send(());
        if let Err(err) = runtime.accept_task.await {
            warn!("accept task ended abnormally: {err}");
        }
        self.registry.clear();

        info!("server stopped");
        self.log.log("Server closed.");
        Ok(())
    }

    /// Whether a start/stop cycle is currently active
    pub async fn is_running(&self) -> bool {
        self.runtime.lock().await.is_some()
    }

    /// The bound address of the running listener
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.runtime.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Number of currently connected sessions
    pub fn active_sessions(&self) -> usize {
        self.registry.len()
    }
}

/// Accept connections forever, one spawned session task per connection,
/// until the shutdown signal or an accept error.
async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "connection accepted");
                    tokio::spawn(session::run(stream, peer, ctx.clone()));
                }
                Err(err) => {
                    warn!("error accepting clients: {err}");
                    break;
                }
            },
        }
    }
}
