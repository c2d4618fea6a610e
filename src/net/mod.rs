//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Server side:
//!     server.rs (bind, accept loop, optional connection limit)
//!     → tls.rs (certificate pair → rustls ServerConfig)
//!     → connection.rs (ID + lifetime tracking)
//!     → Hand off to caller's handler on its own task
//!
//! Client side:
//!     client.rs (dial per ClientMode)
//!     → tls.rs (client config: mutual / insecure)
//!     → one write, one bounded read per exchange
//! ```
//!
//! # Design Decisions
//! - No framing: payloads are opaque bytes
//! - Client and server share nothing but the TLS helpers

pub mod client;
pub mod connection;
pub mod server;
pub mod tls;
