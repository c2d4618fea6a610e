//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use stcp::{Client, ClientOptions, Connection, Server, ServerOptions};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;

/// A self-signed certificate/key pair written to a temp directory.
///
/// Valid for "localhost" and 127.0.0.1, so it can double as its own CA.
pub struct CertPair {
    _dir: TempDir,
    pub cert: PathBuf,
    pub key: PathBuf,
}

pub fn cert_pair() -> CertPair {
    let generated = rcgen::generate_simple_self_signed(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
    ])
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let cert = dir.path().join("cert.pem");
    let key = dir.path().join("key.pem");
    std::fs::write(&cert, generated.cert.pem()).unwrap();
    std::fs::write(&key, generated.key_pair.serialize_pem()).unwrap();

    CertPair { _dir: dir, cert, key }
}

/// Bind on an ephemeral port and run `serve` in the background.
pub async fn start_server<H, Fut>(
    pair: &CertPair,
    tweak: impl FnOnce(ServerOptions) -> ServerOptions,
    handler: H,
) -> (Arc<Server>, JoinHandle<stcp::Result<()>>)
where
    H: Fn(Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let options = tweak(ServerOptions::new("127.0.0.1:0", &pair.cert, &pair.key));
    let server = Arc::new(Server::bind(&options).await.unwrap());

    let serving = Arc::clone(&server);
    let handle = tokio::spawn(async move { serving.serve(handler).await });
    (server, handle)
}

/// Returns once the accept loop has taken over the listener.
///
/// A TLS handshake only completes after `accept`, so one successful connect
/// is enough.
pub async fn wait_until_serving(server: &Server) {
    let mut client = Client::connect(&server.local_addr().to_string(), ClientOptions::insecure_tls())
        .await
        .unwrap();
    client.close().await.unwrap();
}

/// Echo every read back until the peer hangs up.
pub async fn echo(mut conn: Connection) {
    let mut buf = vec![0u8; 8192];
    loop {
        match conn.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if conn.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    }
}
