//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap every backend I/O step with the configured read timeout
//! - Name the stage that expired so callers can tell a slow connect from a
//!   stalled body
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Each stage gets its own full budget; there is no overall deadline
//! - Timeout errors are distinct from other errors
//! - Timed-out requests return 504 Gateway Timeout

use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::error::ProxyError;

/// I/O stage a deadline applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// TCP connection establishment.
    Connect,
    /// TLS handshake on top of an established connection.
    TlsHandshake,
    /// A single write of the request head or one body chunk.
    RequestWrite,
    /// Receipt of the complete final response head, including any interim
    /// 1xx responses before it.
    ResponseHead,
    /// A single read of response body data.
    ResponseBody,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Connect => "connect",
            Stage::TlsHandshake => "TLS handshake",
            Stage::RequestWrite => "request write",
            Stage::ResponseHead => "response head",
            Stage::ResponseBody => "response body read",
        };
        f.write_str(name)
    }
}

/// Run `future` with `limit` as its deadline.
pub async fn with_timeout<F, T>(stage: Stage, limit: Duration, future: F) -> Result<T, ProxyError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| ProxyError::Timeout {
            stage,
            after: limit,
        })
}
