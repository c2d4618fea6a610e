//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits > 0)
//! - Check addresses look like "host:port"
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - File existence is not checked here; certificate loading reports that

use thiserror::Error;

use crate::config::schema::{ClientModeConfig, StcpConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: {value:?} is not a host:port address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{0} must not be empty")]
    EmptyPath(&'static str),
}

/// Check a parsed configuration. Returns every problem found.
pub fn validate_config(config: &StcpConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address("server.bind_address", &config.server.bind_address, &mut errors);
    check_address("client.address", &config.client.address, &mut errors);

    if config.server.max_connections == Some(0) {
        errors.push(ValidationError::Zero("server.max_connections"));
    }
    if config.server.handshake_timeout_secs == 0 {
        errors.push(ValidationError::Zero("server.handshake_timeout_secs"));
    }
    if config.client.connect_timeout_secs == 0 {
        errors.push(ValidationError::Zero("client.connect_timeout_secs"));
    }

    if config.server.tls.cert_path.as_os_str().is_empty() {
        errors.push(ValidationError::EmptyPath("server.tls.cert_path"));
    }
    if config.server.tls.key_path.as_os_str().is_empty() {
        errors.push(ValidationError::EmptyPath("server.tls.key_path"));
    }

    match &config.client.mode {
        ClientModeConfig::MutualTls {
            cert_path, key_path, ..
        } => {
            if cert_path.as_os_str().is_empty() {
                errors.push(ValidationError::EmptyPath("client.mode.cert_path"));
            }
            if key_path.as_os_str().is_empty() {
                errors.push(ValidationError::EmptyPath("client.mode.key_path"));
            }
        }
        ClientModeConfig::Plain {
            deadline_secs: Some(0),
        } => errors.push(ValidationError::Zero("client.mode.deadline_secs")),
        _ => {}
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(field: &'static str, value: &str, errors: &mut Vec<ValidationError>) {
    let valid = match value.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    };
    if !valid {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
