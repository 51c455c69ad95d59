//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check that paired settings are set together
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - File existence of PEM paths is checked later, when the engine is built

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::net::tls::TlsVersion;
use crate::routing::resolver::Origin;

/// A single semantic problem in a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("upstream.backend: {0}")]
    InvalidBackend(String),

    #[error("upstream.read_timeout_ms must be greater than zero")]
    ZeroTimeout,

    #[error("upstream.max_header_bytes must be at least {min}, got {value}")]
    HeaderLimitTooSmall { min: usize, value: usize },

    #[error("upstream.tls.version: {0}")]
    InvalidTlsVersion(String),

    #[error("upstream.tls.client_certificate and upstream.tls.client_key must be set together")]
    IncompleteClientIdentity,

    #[error("proxy.path_prefix must start with '/', got {0:?}")]
    InvalidPathPrefix(String),
}

const MIN_HEADER_BYTES: usize = 1024;

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    let upstream = &config.upstream;
    if let Some(backend) = &upstream.backend {
        if let Err(e) = Origin::parse(backend) {
            errors.push(ValidationError::InvalidBackend(e.to_string()));
        }
    }
    if upstream.read_timeout_ms == 0 {
        errors.push(ValidationError::ZeroTimeout);
    }
    if upstream.max_header_bytes < MIN_HEADER_BYTES {
        errors.push(ValidationError::HeaderLimitTooSmall {
            min: MIN_HEADER_BYTES,
            value: upstream.max_header_bytes,
        });
    }
    if let Some(version) = &upstream.tls.version {
        if let Err(e) = version.parse::<TlsVersion>() {
            errors.push(ValidationError::InvalidTlsVersion(e.to_string()));
        }
    }
    if upstream.tls.client_certificate.is_some() != upstream.tls.client_key.is_some() {
        errors.push(ValidationError::IncompleteClientIdentity);
    }

    if let Some(prefix) = &config.proxy.path_prefix {
        if !prefix.starts_with('/') {
            errors.push(ValidationError::InvalidPathPrefix(prefix.clone()));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
