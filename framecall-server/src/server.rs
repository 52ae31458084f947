//! TCP service loop.

use crate::connection::ConnectionDriver;
use crate::error::ServerError;
use crate::registry::MethodRegistry;
use framecall_protocol::DEFAULT_MAX_FRAME_SIZE;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Default per-read timeout for accepted connections; an idle
/// persistent connection is completed after this long without a frame.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Default cap on concurrently served connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Per-read timeout for accepted connections.
    pub read_timeout: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum accepted frame size in bytes.
    pub max_frame_size: usize,
    /// Optional `host` label stamped on reply envelopes; defaults to
    /// the bound address.
    pub host: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5599".parse().unwrap(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            host: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    /// Connections currently promoted to persistent.
    pub persistent_connections: AtomicU64,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// Point-in-time status snapshot.
#[derive(Debug, Serialize)]
pub struct ServerStatus {
    pub local_addr: SocketAddr,
    pub active_connections: u64,
    pub persistent_connections: u64,
    pub registrations: Vec<(String, String)>,
}

/// The callee runtime: accepts connections and serves registered
/// methods over them.
pub struct Server {
    config: ServerConfig,
    registry: Arc<MethodRegistry>,
    listener: TcpListener,
    local_addr: SocketAddr,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Binds the listening socket.
    ///
    /// Binding is separate from [`run`](Self::run) so the actual bound
    /// address (port 0 resolves here) is known before serving starts.
    pub async fn bind(
        config: ServerConfig,
        registry: Arc<MethodRegistry>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            config,
            registry,
            listener,
            local_addr,
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        })
    }

    /// Runs the accept loop until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(addr = %self.local_addr, "server listening");

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.accept(stream, peer),
                        Err(e) => {
                            tracing::error!(error = %e, "accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Spawns a connection driver for one accepted socket.
    fn accept(&self, stream: TcpStream, peer: SocketAddr) {
        if self.stats.connections_active.load(Ordering::Relaxed)
            >= self.config.max_connections as u64
        {
            tracing::warn!(%peer, "connection limit reached, rejecting");
            return;
        }

        tracing::debug!(%peer, "client connected");
        self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);
        let _ = stream.set_nodelay(true);

        let host = self
            .config
            .host
            .clone()
            .unwrap_or_else(|| self.local_addr.to_string());
        let driver = ConnectionDriver::new(
            stream,
            self.config.read_timeout,
            self.config.max_frame_size,
            peer.to_string(),
            host,
            Arc::clone(&self.registry),
            Arc::clone(&self.stats),
        );
        let shutdown_rx = self.shutdown.subscribe();
        let stats = Arc::clone(&self.stats);

        tokio::spawn(async move {
            match driver.run(shutdown_rx).await {
                Ok(()) | Err(ServerError::ShuttingDown) => {}
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "connection error");
                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                }
            }
            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            tracing::debug!(%peer, "client disconnected");
        });
    }

    /// Initiates server shutdown; in-flight connections are signaled.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Returns a status snapshot: bound address, connection gauges,
    /// and every registered (service, method) pair.
    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            local_addr: self.local_addr,
            active_connections: self.stats.connections_active.load(Ordering::Relaxed),
            persistent_connections: self.stats.persistent_connections.load(Ordering::Relaxed),
            registrations: self.registry.registrations(),
        }
    }
}
