//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Server::close → accept loop returns
//! ```
//!
//! In-flight handlers are not drained; the process exits once `serve` returns.

pub mod signals;
