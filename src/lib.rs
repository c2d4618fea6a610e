//! Minimal TCP/TLS client and TLS server helpers.
//!
//! - [`Client`]: dial in mutual-TLS, insecure-TLS or plain mode, then
//!   exchange one request for one response of at most
//!   [`MAX_RESPONSE_BYTES`].
//! - [`Server`]: TLS listener that hands every accepted [`Connection`] to a
//!   caller-supplied handler on its own task.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::StcpConfig;
pub use error::{Error, Result};
pub use net::client::{Client, ClientMode, ClientOptions, MAX_RESPONSE_BYTES};
pub use net::connection::{Connection, ConnectionId};
pub use net::server::{Server, ServerOptions};
