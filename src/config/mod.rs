//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (read & deserialize)
//!     → validation.rs (semantic checks)
//!     → StcpConfig (validated, immutable)
//!     → ServerOptions / ClientOptions for the net layer
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Deadlines are stored as relative seconds and become absolute at connect time

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{ClientConfig, ClientModeConfig, LoggingConfig, ServerConfig, StcpConfig, TlsConfig};
