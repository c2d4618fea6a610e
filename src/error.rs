//! Error taxonomy for client and server operations.

use thiserror::Error;

/// Errors returned by [`Client`](crate::Client) and [`Server`](crate::Server).
///
/// Every failure is returned to the immediate caller. Nothing is retried.
#[derive(Debug, Error)]
pub enum Error {
    /// Certificate or private key could not be read or parsed.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// The listening socket could not be bound.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Dialing or the TLS handshake failed.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// A setup timeout or connection deadline elapsed.
    #[error("operation timed out")]
    Timeout,

    /// Writing the request failed.
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    /// Reading the response failed.
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    /// The accept loop hit an error that was not caused by `close()`.
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// Operation attempted on a closed client or server.
    #[error("connection is closed")]
    Closed,

    /// `serve` was called while another accept loop owns the listener.
    #[error("server is already serving")]
    AlreadyServing,

    /// The address could not be split into host and port.
    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    /// The TLS configuration could not be assembled.
    #[error("tls configuration error: {0}")]
    Tls(#[from] rustls::Error),
}

/// Result type for stcp operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors that mean the handle is no longer usable.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }

    /// True when a timeout or deadline was the cause.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_address() {
        let err = Error::Bind {
            address: "127.0.0.1:1".into(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(err.to_string(), "failed to bind 127.0.0.1:1: in use");
    }

    #[test]
    fn classification_helpers() {
        assert!(Error::Closed.is_closed());
        assert!(Error::Timeout.is_timeout());
        assert!(!Error::AlreadyServing.is_closed());
    }
}
