//! TLS server with a spawn-per-connection accept loop.
//!
//! # Responsibilities
//! - Load the certificate pair and bind the listening socket
//! - Accept connections and hand each one to the handler on its own task
//! - Optionally bound the number of live connections via a semaphore
//! - Stop promptly when `close()` is called, even with no traffic
//!
//! # Design Decisions
//! - The TLS handshake runs on the connection task, never on the accept loop
//! - Handler panics are contained to their task and logged
//! - An explicit closed flag separates shutdown from real accept failures

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio_rustls::TlsAcceptor;

use crate::error::{Error, Result};
use crate::net::connection::{Connection, ConnectionTracker};
use crate::net::tls;

/// Time a client has to complete the TLS handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Options for [`Server::bind`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Bind address (e.g., "0.0.0.0:8443").
    pub bind_address: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Cap on concurrently live connections. `None` spawns without limit.
    pub max_connections: Option<usize>,
    pub handshake_timeout: Duration,
}

impl ServerOptions {
    pub fn new(
        bind_address: impl Into<String>,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bind_address: bind_address.into(),
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            max_connections: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

/// A bound TLS listener.
///
/// `serve` and `close` both take `&self`; wrap the server in an `Arc` to call
/// `close` from another task while `serve` is running.
pub struct Server {
    /// Taken by the accept loop for its lifetime; `None` once serving or closed.
    listener: Mutex<Option<TcpListener>>,
    acceptor: TlsAcceptor,
    local_addr: SocketAddr,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
    connection_limit: Option<Arc<Semaphore>>,
    handshake_timeout: Duration,
    tracker: ConnectionTracker,
}

impl Server {
    /// Load `cert_path`/`key_path` and bind a TLS listener on `address`.
    pub async fn listen(
        address: &str,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        Self::bind(&ServerOptions::new(address, cert_path, key_path)).await
    }

    /// Bind with explicit options.
    ///
    /// The certificate pair is loaded before the socket is created, so a bad
    /// pair never leaves a bound port behind. A `max_connections` of zero is
    /// treated as one.
    pub async fn bind(options: &ServerOptions) -> Result<Self> {
        let config = tls::server_config(&options.cert_path, &options.key_path)?;

        let bind_err = |source: io::Error| Error::Bind {
            address: options.bind_address.clone(),
            source,
        };
        let listener = TcpListener::bind(&options.bind_address)
            .await
            .map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        tracing::info!(
            address = %local_addr,
            max_connections = ?options.max_connections,
            "Listener bound"
        );

        let (close_tx, _) = watch::channel(false);
        Ok(Self {
            listener: Mutex::new(Some(listener)),
            acceptor: TlsAcceptor::from(config),
            local_addr,
            closed: AtomicBool::new(false),
            close_tx,
            connection_limit: options
                .max_connections
                .map(|max| Arc::new(Semaphore::new(max.max(1)))),
            handshake_timeout: options.handshake_timeout,
            tracker: ConnectionTracker::new(),
        })
    }

    /// Accept connections until the server is closed.
    ///
    /// Every connection gets its own task: TLS handshake, then `handler`.
    /// The loop never waits for handlers. Returns `Ok(())` after `close()`,
    /// or `Err(Error::Accept)` if the listener fails for any other reason.
    pub async fn serve<H, Fut>(&self, handler: H) -> Result<()>
    where
        H: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = {
            let mut slot = self.lock_listener();
            if self.is_closed() {
                return Err(Error::Closed);
            }
            slot.take().ok_or(Error::AlreadyServing)?
        };

        let handler = Arc::new(handler);
        let mut close_rx = self.close_tx.subscribe();

        tracing::info!(address = %self.local_addr, "Accept loop started");

        let result = loop {
            // Acquire permit first (backpressure)
            let permit = match &self.connection_limit {
                Some(limit) => tokio::select! {
                    permit = Arc::clone(limit).acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break Ok(()),
                    },
                    _ = closed(&mut close_rx) => break Ok(()),
                },
                None => None,
            };

            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = closed(&mut close_rx) => break Ok(()),
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    self.dispatch(stream, peer_addr, permit, Arc::clone(&handler));
                }
                Err(_) if self.is_closed() => break Ok(()),
                Err(e) if is_transient(&e) => {
                    tracing::warn!(error = %e, "Transient accept error, continuing");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Accept failed, stopping server");
                    break Err(Error::Accept(e));
                }
            }
        };

        // The loop never restarts, so a failed listener also counts as closed.
        self.closed.store(true, Ordering::SeqCst);
        drop(listener);

        tracing::info!(
            address = %self.local_addr,
            active_connections = self.tracker.active_count(),
            "Accept loop stopped"
        );
        result
    }

    fn dispatch<H, Fut>(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        permit: Option<OwnedSemaphorePermit>,
        handler: Arc<H>,
    ) where
        H: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let acceptor = self.acceptor.clone();
        let handshake_timeout = self.handshake_timeout;
        let guard = self.tracker.track();

        tokio::spawn(async move {
            let _permit = permit;
            let id = guard.id();

            let stream = match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    tracing::warn!(connection_id = %id, %peer_addr, error = %e, "TLS handshake failed");
                    return;
                }
                Err(_) => {
                    tracing::warn!(connection_id = %id, %peer_addr, "TLS handshake timed out");
                    return;
                }
            };

            tracing::debug!(connection_id = %id, %peer_addr, "Connection accepted");

            let connection = Connection::new(peer_addr, stream, guard);
            if let Err(e) = tokio::spawn((*handler)(connection)).await {
                if e.is_panic() {
                    tracing::error!(connection_id = %id, %peer_addr, "Connection handler panicked");
                }
            }
        });
    }

    /// Stop the accept loop and release the listening socket.
    ///
    /// Connections already handed to handlers are not touched. A second call
    /// returns [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        self.close_tx.send_replace(true);

        // No accept loop running: drop the socket here.
        drop(self.lock_listener().take());

        tracing::info!(address = %self.local_addr, "Server closed");
        Ok(())
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Connections accepted whose handlers have not finished yet.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    fn lock_listener(&self) -> MutexGuard<'_, Option<TcpListener>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Resolves once `close()` has been called.
async fn closed(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}

/// Per-connection failures that say nothing about the listener itself.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
