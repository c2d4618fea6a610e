//! Single-shot request/response client.
//!
//! # Responsibilities
//! - Dial a remote endpoint in one of three transport modes
//! - Exchange exactly one write and one bounded read per `write` call
//! - Refuse every operation once closed
//!
//! # Design Decisions
//! - One client type; the transport is picked by `ClientMode`
//! - Responses are capped at `MAX_RESPONSE_BYTES`, larger replies are truncated
//! - Any I/O failure closes the client

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};
use crate::net::tls;

/// Largest response a single `write` call returns.
pub const MAX_RESPONSE_BYTES: usize = 4096;

/// Setup timeout applied to TLS dials unless overridden.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport selection for [`Client::connect`].
#[derive(Debug, Clone)]
pub enum ClientMode {
    /// TLS, presenting a local certificate/key pair to the server.
    ///
    /// The server is verified against `ca_path`, or the Mozilla roots if unset.
    MutualTls {
        cert_path: PathBuf,
        key_path: PathBuf,
        ca_path: Option<PathBuf>,
    },
    /// TLS without verifying the server certificate.
    ///
    /// **Insecure**: the channel is encrypted but the peer is not
    /// authenticated. Use only against endpoints you control.
    InsecureTls,
    /// Raw TCP. The deadline bounds the dial and every later read and write.
    Plain { deadline: Option<Instant> },
}

impl ClientMode {
    pub fn name(&self) -> &'static str {
        match self {
            ClientMode::MutualTls { .. } => "mutual-tls",
            ClientMode::InsecureTls => "insecure-tls",
            ClientMode::Plain { .. } => "plain",
        }
    }
}

/// Options for [`Client::connect`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub mode: ClientMode,
    /// Bound on dial + TLS handshake. Not used in plain mode.
    pub connect_timeout: Duration,
    /// TLS server name. Defaults to the host part of the address.
    pub server_name: Option<String>,
}

impl ClientOptions {
    pub fn new(mode: ClientMode) -> Self {
        Self {
            mode,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            server_name: None,
        }
    }

    pub fn mutual_tls(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self::new(ClientMode::MutualTls {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            ca_path: None,
        })
    }

    pub fn insecure_tls() -> Self {
        Self::new(ClientMode::InsecureTls)
    }

    pub fn plain(deadline: Option<Instant>) -> Self {
        Self::new(ClientMode::Plain { deadline })
    }

    /// Trust anchors for mutual TLS. Ignored by the other modes.
    pub fn with_ca(mut self, path: impl Into<PathBuf>) -> Self {
        if let ClientMode::MutualTls { ca_path, .. } = &mut self.mode {
            *ca_path = Some(path.into());
        }
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// A connected client. `None` transport means closed.
///
/// Methods take `&mut self`; share across tasks behind a `Mutex`.
pub struct Client {
    address: String,
    peer_addr: SocketAddr,
    mode: &'static str,
    deadline: Option<Instant>,
    transport: Option<Transport>,
}

impl Client {
    /// Dial `address` ("host:port") using the transport chosen by `options`.
    ///
    /// Certificates are loaded before any socket is opened.
    pub async fn connect(address: &str, options: ClientOptions) -> Result<Self> {
        let mode = options.mode.name();
        let client = match &options.mode {
            ClientMode::MutualTls {
                cert_path,
                key_path,
                ca_path,
            } => {
                let config = tls::mutual_client_config(cert_path, key_path, ca_path.as_deref())?;
                Self::dial_tls(address, config, &options).await?
            }
            ClientMode::InsecureTls => {
                tracing::warn!(address, "Connecting without certificate verification");
                let config = tls::insecure_client_config()?;
                Self::dial_tls(address, config, &options).await?
            }
            ClientMode::Plain { deadline } => Self::dial_plain(address, *deadline).await?,
        };

        tracing::debug!(
            address,
            peer_addr = %client.peer_addr,
            mode,
            "Client connected"
        );
        Ok(client)
    }

    async fn dial_tls(
        address: &str,
        config: Arc<rustls::ClientConfig>,
        options: &ClientOptions,
    ) -> Result<Self> {
        let name = tls::server_name(address, options.server_name.as_deref())?;
        let connector = TlsConnector::from(config);

        let handshake = async {
            let tcp = TcpStream::connect(address).await?;
            let peer_addr = tcp.peer_addr()?;
            let stream = connector.connect(name, tcp).await?;
            Ok::<_, io::Error>((stream, peer_addr))
        };

        let (stream, peer_addr) = tokio::time::timeout(options.connect_timeout, handshake)
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|source| Error::Connect {
                address: address.to_string(),
                source,
            })?;

        Ok(Self {
            address: address.to_string(),
            peer_addr,
            mode: options.mode.name(),
            deadline: None,
            transport: Some(Transport::Tls(Box::new(stream))),
        })
    }

    async fn dial_plain(address: &str, deadline: Option<Instant>) -> Result<Self> {
        let dial = async {
            let tcp = TcpStream::connect(address).await?;
            let peer_addr = tcp.peer_addr()?;
            Ok::<_, io::Error>((tcp, peer_addr))
        };

        let (tcp, peer_addr) = within(deadline, dial)
            .await?
            .map_err(|source| Error::Connect {
                address: address.to_string(),
                source,
            })?;

        Ok(Self {
            address: address.to_string(),
            peer_addr,
            mode: "plain",
            deadline,
            transport: Some(Transport::Plain(tcp)),
        })
    }

    /// Send `message` in full, then return whatever a single read yields.
    ///
    /// At most [`MAX_RESPONSE_BYTES`] are returned; anything beyond that is
    /// left unread. An empty response means the peer closed the connection.
    pub async fn write(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        let result = self.exchange(message).await;
        if let Err(e) = &result {
            if !e.is_closed() {
                tracing::debug!(address = %self.address, error = %e, "Exchange failed, closing client");
                self.transport = None;
            }
        }
        result
    }

    /// String form of [`write`](Self::write). Invalid UTF-8 is replaced.
    pub async fn write_str(&mut self, message: &str) -> Result<String> {
        let response = self.write(message.as_bytes()).await?;
        Ok(String::from_utf8_lossy(&response).into_owned())
    }

    async fn exchange(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        let deadline = self.deadline;
        let transport = self.transport.as_mut().ok_or(Error::Closed)?;

        within(deadline, async {
            transport.write_all(message).await?;
            transport.flush().await
        })
        .await?
        .map_err(Error::Write)?;

        let mut buf = vec![0u8; MAX_RESPONSE_BYTES];
        let n = within(deadline, transport.read(&mut buf))
            .await?
            .map_err(Error::Read)?;
        buf.truncate(n);

        tracing::trace!(
            address = %self.address,
            sent = message.len(),
            received = n,
            "Exchange complete"
        );
        Ok(buf)
    }

    /// Shut the connection down. A second call returns [`Error::Closed`].
    ///
    /// The plain-mode deadline does not apply here: an expired deadline
    /// still closes cleanly.
    pub async fn close(&mut self) -> Result<()> {
        let mut transport = self.transport.take().ok_or(Error::Closed)?;

        match transport.shutdown().await {
            Ok(()) => {}
            // The peer hanging up first is not a failure to close.
            Err(e) if matches!(
                e.kind(),
                io::ErrorKind::NotConnected
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
            ) => {}
            Err(e) => return Err(Error::Write(e)),
        }

        tracing::debug!(address = %self.address, "Client closed");
        Ok(())
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// "mutual-tls", "insecure-tls" or "plain".
    pub fn mode_name(&self) -> &'static str {
        self.mode
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.address)
            .field("peer_addr", &self.peer_addr)
            .field("mode", &self.mode)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Run `fut`, failing with [`Error::Timeout`] once `deadline` passes.
async fn within<T, F>(deadline: Option<Instant>, fut: F) -> Result<io::Result<T>>
where
    F: Future<Output = io::Result<T>>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| Error::Timeout),
        None => Ok(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn with_ca_only_applies_to_mutual_tls() {
        let options = ClientOptions::mutual_tls("c.pem", "k.pem").with_ca("ca.pem");
        match options.mode {
            ClientMode::MutualTls { ca_path, .. } => {
                assert_eq!(ca_path, Some(PathBuf::from("ca.pem")))
            }
            _ => panic!("mode changed"),
        }

        let options = ClientOptions::insecure_tls().with_ca("ca.pem");
        assert!(matches!(options.mode, ClientMode::InsecureTls));
    }

    #[test]
    fn default_connect_timeout_is_five_seconds() {
        let options = ClientOptions::plain(None);
        assert_eq!(options.connect_timeout, Duration::from_secs(5));
        assert_eq!(options.mode.name(), "plain");
    }

    #[tokio::test]
    async fn plain_echo_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(&buf[..n]).await.unwrap();
        });

        let mut client = Client::connect(&addr.to_string(), ClientOptions::plain(None))
            .await
            .unwrap();
        assert_eq!(client.mode_name(), "plain");
        assert_eq!(client.write_str("ping").await.unwrap(), "ping");

        client.close().await.unwrap();
        assert!(client.is_closed());
        assert!(matches!(client.write(b"again").await, Err(Error::Closed)));
        assert!(matches!(client.close().await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn plain_deadline_bounds_the_read() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and never answer.
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let deadline = Instant::now() + Duration::from_millis(200);
        let mut client = Client::connect(&addr.to_string(), ClientOptions::plain(Some(deadline)))
            .await
            .unwrap();

        let err = client.write(b"hello").await.unwrap_err();
        assert!(err.is_timeout());
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn close_after_deadline_succeeds() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let deadline = Instant::now() + Duration::from_millis(100);
        let mut client = Client::connect(&addr.to_string(), ClientOptions::plain(Some(deadline)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        client.close().await.unwrap();
        assert!(client.is_closed());
        assert!(matches!(client.close().await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn tls_setup_timeout_is_timeout_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept the TCP connection but never answer the ClientHello.
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let options = ClientOptions::insecure_tls().with_connect_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let err = Client::connect(&addr.to_string(), options).await.unwrap_err();

        assert!(matches!(err, Error::Timeout), "got {err:?}");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn connect_refused_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = Client::connect(&addr.to_string(), ClientOptions::plain(None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
    }
}
