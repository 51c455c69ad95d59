//! Response relay.
//!
//! # Responsibilities
//! - Turn a backend response handle into the response handed to the caller
//! - Strip hop-by-hop headers before the response hook sees them
//! - Buffer the body first, or pass it on live, depending on the mode
//!
//! # Design Decisions
//! - Content-Length is never corrected behind the hook's back;
//!   [`ProxyResponse::strip_content_length`] is there for hooks that change
//!   the body size
//! - Whoever holds a live body holds the backend connection: dropping the
//!   response at any point closes it

use axum::http::StatusCode;
use bytes::Bytes;

use crate::error::ProxyError;
use crate::hooks::Hooks;
use crate::http::body::ResponseBody;
use crate::http::headers::{strip_hop_by_hop, HeaderList};
use crate::net::executor::ResponseHandle;

/// Status, headers and body delivered to the caller.
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderList,
    pub body: ResponseBody,
}

impl ProxyResponse {
    pub fn new(status: StatusCode, headers: HeaderList, body: ResponseBody) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// A response with a materialized body and a matching Content-Length.
    pub fn full(status: StatusCode, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        let mut headers = HeaderList::new();
        headers.append("Content-Length", body.len().to_string());
        Self::new(status, headers, ResponseBody::Full(body))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replace the body with materialized bytes. Content-Length is left as is.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = ResponseBody::Full(body.into());
    }

    /// Drop every Content-Length header, leaving the delivery layer to frame
    /// the body.
    pub fn strip_content_length(&mut self) -> &mut Self {
        self.headers.remove("content-length");
        self
    }

    /// True when a materialized body disagrees with the Content-Length header.
    pub fn content_length_mismatch(&self) -> bool {
        let Some(bytes) = self.body.as_bytes() else {
            return false;
        };
        match self.headers.get("content-length") {
            Some(value) => value.trim().parse::<u64>().ok() != Some(bytes.len() as u64),
            None => false,
        }
    }
}

/// Produces the delivered response from a backend response handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseRelay;

impl ResponseRelay {
    pub async fn relay(
        handle: ResponseHandle,
        hooks: &Hooks,
        streaming: bool,
    ) -> Result<ProxyResponse, ProxyError> {
        let ResponseHandle {
            status,
            reason: _,
            mut headers,
            body,
        } = handle;

        // an invalid status drops `body` and with it the connection
        let status = StatusCode::from_u16(status)
            .map_err(|_| ProxyError::Protocol(format!("invalid status code {status}")))?;
        strip_hop_by_hop(&mut headers);

        let body = if streaming {
            ResponseBody::Live(body)
        } else {
            let bytes = ResponseBody::Live(body).collect().await?;
            tracing::trace!(bytes = bytes.len(), "Response body buffered");
            ResponseBody::Full(bytes)
        };

        hooks.rewrite_response(ProxyResponse::new(status, headers, body))
    }
}
