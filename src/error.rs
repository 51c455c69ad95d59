//! Error types surfaced by the engine.
//!
//! Every failure is terminal for the request that produced it. The engine
//! never retries and never synthesizes a fallback response; the host decides
//! what the caller sees (see [`ProxyError::status_code`]).

use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

use crate::resilience::timeouts::Stage;

/// Boxed error used at the hook and body-stream seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced while proxying a single request.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Invalid configuration detected while building the engine.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// DNS failure, refused or reset connection.
    #[error("backend {target} connection failed: {source}")]
    Connection {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// TLS handshake or certificate validation failure.
    #[error("TLS handshake with {target} failed: {source}")]
    Tls {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// A configured deadline elapsed at one of the I/O stages.
    #[error("backend {stage} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    /// Malformed status line, headers or body framing from the backend.
    #[error("backend protocol error: {0}")]
    Protocol(String),

    /// A caller-supplied hook failed. The original error is the source.
    #[error("hook failed: {0}")]
    Hook(#[source] BoxError),

    /// The inbound request cannot be forwarded as given.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Writing to the delivery sink failed (consumer went away).
    #[error("downstream write failed: {0}")]
    Downstream(#[source] std::io::Error),
}

impl ProxyError {
    /// Returns true for timeouts at any stage.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProxyError::Timeout { .. })
    }

    /// Status code a host should answer with when this error ends a request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Connection { .. } | ProxyError::Tls { .. } | ProxyError::Protocol(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Configuration(_) | ProxyError::Hook(_) | ProxyError::Downstream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
