//! TLS configuration and certificate loading.
//!
//! All configs are built against the `ring` crypto provider explicitly so the
//! crate never depends on a process-wide default provider being installed.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::error::{Error, Result};

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn open(path: &Path, what: &str) -> Result<BufReader<File>> {
    if !path.exists() {
        return Err(Error::Certificate(format!(
            "{} file not found: {:?}",
            what, path
        )));
    }
    let file = File::open(path)
        .map_err(|e| Error::Certificate(format!("cannot open {:?}: {}", path, e)))?;
    Ok(BufReader::new(file))
}

/// Load every certificate from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open(path, "Certificate")?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Certificate(format!("malformed PEM in {:?}: {}", path, e)))?;

    if certs.is_empty() {
        return Err(Error::Certificate(format!(
            "no certificates found in {:?}",
            path
        )));
    }
    Ok(certs)
}

/// Load the first private key (PKCS#1, PKCS#8 or SEC1) from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open(path, "Private key")?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::Certificate(format!("malformed PEM in {:?}: {}", path, e)))?
        .ok_or_else(|| Error::Certificate(format!("no private key found in {:?}", path)))
}

/// Build the listener-side config from a certificate/key pair.
///
/// Client certificates are not requested.
pub fn server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Certificate(e.to_string()))?;

    tracing::debug!(cert = ?cert_path, "Loaded server certificate");
    Ok(Arc::new(config))
}

/// Build a client config that presents a certificate/key pair.
///
/// The peer is verified against `ca_path` when given, otherwise against the
/// Mozilla root set.
pub fn mutual_client_config(
    cert_path: &Path,
    key_path: &Path,
    ca_path: Option<&Path>,
) -> Result<Arc<ClientConfig>> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let mut roots = RootCertStore::empty();
    match ca_path {
        Some(ca) => {
            for cert in load_certs(ca)? {
                roots
                    .add(cert)
                    .map_err(|e| Error::Certificate(format!("bad CA in {:?}: {}", ca, e)))?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| Error::Certificate(e.to_string()))?;

    Ok(Arc::new(config))
}

/// Build a client config that **skips certificate verification**.
///
/// The channel is encrypted but the server is not authenticated, so any
/// active attacker on the path can impersonate it.
pub fn insecure_client_config() -> Result<Arc<ClientConfig>> {
    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(danger::NoVerifier))
        .with_no_client_auth();

    Ok(Arc::new(config))
}

/// Resolve the TLS server name for `address` ("host:port").
///
/// `override_name` wins when present. IP literals become IP server names.
pub fn server_name(address: &str, override_name: Option<&str>) -> Result<ServerName<'static>> {
    let host = match override_name {
        Some(name) => name,
        None => split_host(address)?,
    };

    ServerName::try_from(host.to_string()).map_err(|_| Error::InvalidAddress(address.to_string()))
}

fn split_host(address: &str) -> Result<&str> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidAddress(address.to_string()))?;

    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(Error::InvalidAddress(address.to_string()));
    }

    Ok(host.trim_start_matches('[').trim_end_matches(']'))
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    /// Accepts any server certificate. Signatures are still checked so the
    /// handshake itself stays well-formed.
    #[derive(Debug)]
    pub struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            rustls::crypto::verify_tls12_signature(
                message,
                cert,
                dss,
                &rustls::crypto::ring::default_provider().signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            rustls::crypto::verify_tls13_signature(
                message,
                cert,
                dss,
                &rustls::crypto::ring::default_provider().signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn server_name_from_host_port() {
        let name = server_name("localhost:8443", None).unwrap();
        assert_eq!(name.to_str(), "localhost");

        let ip = server_name("127.0.0.1:8443", None).unwrap();
        assert!(matches!(ip, ServerName::IpAddress(_)));

        let v6 = server_name("[::1]:8443", None).unwrap();
        assert!(matches!(v6, ServerName::IpAddress(_)));
    }

    #[test]
    fn server_name_override_wins() {
        let name = server_name("10.0.0.1:443", Some("example.com")).unwrap();
        assert_eq!(name.to_str(), "example.com");
    }

    #[test]
    fn server_name_rejects_bad_address() {
        assert!(matches!(server_name("no-port", None), Err(Error::InvalidAddress(_))));
        assert!(matches!(server_name(":443", None), Err(Error::InvalidAddress(_))));
        assert!(matches!(server_name("host:http", None), Err(Error::InvalidAddress(_))));
    }

    #[test]
    fn missing_files_are_certificate_errors() {
        let err = load_certs(Path::new("/nonexistent/cert.pem")).unwrap_err();
        assert!(matches!(err, Error::Certificate(_)));

        let err = load_private_key(Path::new("/nonexistent/key.pem")).unwrap_err();
        assert!(matches!(err, Error::Certificate(_)));
    }

    #[test]
    fn garbage_pem_has_no_certificates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is not a certificate").unwrap();

        let err = load_certs(file.path()).unwrap_err();
        assert!(matches!(err, Error::Certificate(_)));
        let err = load_private_key(file.path()).unwrap_err();
        assert!(matches!(err, Error::Certificate(_)));
    }

    #[test]
    fn generated_pair_builds_configs() {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let mut cert = tempfile::NamedTempFile::new().unwrap();
        let mut key = tempfile::NamedTempFile::new().unwrap();
        cert.write_all(generated.cert.pem().as_bytes()).unwrap();
        key.write_all(generated.key_pair.serialize_pem().as_bytes()).unwrap();

        assert!(server_config(cert.path(), key.path()).is_ok());
        assert!(mutual_client_config(cert.path(), key.path(), Some(cert.path())).is_ok());
        assert!(mutual_client_config(cert.path(), key.path(), None).is_ok());
        assert!(insecure_client_config().is_ok());
    }
}
