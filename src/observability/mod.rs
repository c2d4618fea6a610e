//! Observability subsystem.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the binary (see `logging::init`).

pub mod logging;
