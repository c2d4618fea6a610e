//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::net::client::{ClientMode, ClientOptions};
use crate::net::server::ServerOptions;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StcpConfig {
    /// TLS server settings used by `stcp serve`.
    pub server: ServerConfig,

    /// Client settings used by `stcp send`.
    pub client: ClientConfig,

    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8443").
    pub bind_address: String,

    /// Certificate pair presented to clients.
    pub tls: TlsConfig,

    /// Maximum concurrent connections. Unset means unbounded.
    pub max_connections: Option<usize>,

    /// TLS handshake timeout in seconds.
    pub handshake_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8443".to_string(),
            tls: TlsConfig::default(),
            max_connections: None,
            handshake_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn to_options(&self) -> ServerOptions {
        ServerOptions {
            bind_address: self.bind_address.clone(),
            cert_path: self.tls.cert_path.clone(),
            key_path: self.tls.key_path.clone(),
            max_connections: self.max_connections,
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
        }
    }
}

/// Certificate/key pair locations (PEM).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: PathBuf::from("cert.pem"),
            key_path: PathBuf::from("key.pem"),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Remote address (e.g., "127.0.0.1:8443").
    pub address: String,

    pub mode: ClientModeConfig,

    /// Dial + handshake timeout in seconds (TLS modes).
    pub connect_timeout_secs: u64,

    /// TLS server name override.
    pub server_name: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8443".to_string(),
            mode: ClientModeConfig::InsecureTls,
            connect_timeout_secs: 5,
            server_name: None,
        }
    }
}

impl ClientConfig {
    /// Build connect options. A plain-mode deadline starts counting now.
    pub fn to_options(&self) -> ClientOptions {
        let mode = match &self.mode {
            ClientModeConfig::MutualTls {
                cert_path,
                key_path,
                ca_path,
            } => ClientMode::MutualTls {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
                ca_path: ca_path.clone(),
            },
            ClientModeConfig::InsecureTls => ClientMode::InsecureTls,
            ClientModeConfig::Plain { deadline_secs } => ClientMode::Plain {
                deadline: deadline_secs.map(|secs| Instant::now() + Duration::from_secs(secs)),
            },
        };

        ClientOptions {
            mode,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            server_name: self.server_name.clone(),
        }
    }
}

/// Serializable form of [`ClientMode`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientModeConfig {
    MutualTls {
        cert_path: PathBuf,
        key_path: PathBuf,
        #[serde(default)]
        ca_path: Option<PathBuf>,
    },
    InsecureTls,
    Plain {
        /// Deadline for the whole connection, in seconds from connect.
        #[serde(default)]
        deadline_secs: Option<u64>,
    },
}

/// Logging settings for the binary.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "stcp=info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: StcpConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:8443");
        assert_eq!(config.server.max_connections, None);
        assert_eq!(config.client.mode, ClientModeConfig::InsecureTls);
        assert_eq!(config.logging.filter, "stcp=info");
    }

    #[test]
    fn parses_full_document() {
        let config: StcpConfig = toml::from_str(
            r#"
            [server]
            bind_address = "127.0.0.1:9443"
            max_connections = 64
            handshake_timeout_secs = 3

            [server.tls]
            cert_path = "/etc/stcp/server.pem"
            key_path = "/etc/stcp/server.key"

            [client]
            address = "example.com:9443"
            connect_timeout_secs = 2

            [client.mode]
            type = "mutual_tls"
            cert_path = "client.pem"
            key_path = "client.key"
            ca_path = "ca.pem"
            "#,
        )
        .unwrap();

        let server = config.server.to_options();
        assert_eq!(server.bind_address, "127.0.0.1:9443");
        assert_eq!(server.max_connections, Some(64));
        assert_eq!(server.handshake_timeout, Duration::from_secs(3));
        assert_eq!(server.cert_path, PathBuf::from("/etc/stcp/server.pem"));

        let client = config.client.to_options();
        assert_eq!(client.connect_timeout, Duration::from_secs(2));
        match client.mode {
            ClientMode::MutualTls { ca_path, .. } => {
                assert_eq!(ca_path, Some(PathBuf::from("ca.pem")))
            }
            other => panic!("unexpected mode {:?}", other),
        }
    }

    #[test]
    fn plain_deadline_becomes_absolute() {
        let config = ClientConfig {
            mode: ClientModeConfig::Plain {
                deadline_secs: Some(30),
            },
            ..ClientConfig::default()
        };

        let before = Instant::now();
        match config.to_options().mode {
            ClientMode::Plain {
                deadline: Some(deadline),
            } => assert!(deadline >= before + Duration::from_secs(30)),
            other => panic!("unexpected mode {:?}", other),
        }
    }
}
