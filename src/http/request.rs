//! Request translation.
//!
//! # Responsibilities
//! - Run the request hook and continue with the context it returns
//! - Strip hop-by-hop headers, including those nominated by `Connection`
//! - Produce the origin-form request-target the backend receives
//! - Refuse header names, values and targets that could split the request
//!   on the wire
//!
//! # Design Decisions
//! - No I/O: a failing hook means no connection is ever attempted
//! - The body is moved, never copied

use axum::http::{Extensions, Method};
use uuid::Uuid;

use crate::error::ProxyError;
use crate::hooks::Hooks;
use crate::http::body::Body;
use crate::http::context::RequestContext;
use crate::http::headers::{strip_hop_by_hop, HeaderList};
use crate::routing::resolver::Scheme;

/// A request ready to be written to a backend. Consumed exactly once.
#[derive(Debug)]
pub struct OutboundRequest {
    pub request_id: Uuid,
    pub method: Method,
    /// Scheme, host and port of the (rewritten) inbound request; used for
    /// same-origin forwarding.
    pub scheme: Scheme,
    pub host: String,
    pub port: Option<u16>,
    /// Path and query in origin form.
    pub target: String,
    pub headers: HeaderList,
    pub body: Body,
    pub extensions: Extensions,
}

/// Maps an inbound context to an [`OutboundRequest`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestTranslator;

impl RequestTranslator {
    pub fn translate(ctx: RequestContext, hooks: &Hooks) -> Result<OutboundRequest, ProxyError> {
        let request_id = ctx.id;
        let mut ctx = hooks.rewrite_request(ctx)?;

        if ctx.method == Method::CONNECT {
            return Err(ProxyError::InvalidRequest(
                "CONNECT tunnels are not proxied".into(),
            ));
        }

        let target = ctx.path_and_query();
        validate_target(&target)?;

        let mut headers = std::mem::take(&mut ctx.headers);
        if let Some((name, value)) = headers.find_invalid() {
            return Err(ProxyError::InvalidRequest(format!(
                "header {name:?} is not valid HTTP: {value:?}"
            )));
        }
        strip_hop_by_hop(&mut headers);

        tracing::trace!(
            request_id = %request_id,
            method = %ctx.method,
            target = %target,
            headers = headers.len(),
            "Request translated"
        );

        Ok(OutboundRequest {
            request_id,
            body: ctx.take_body(),
            method: ctx.method,
            scheme: ctx.scheme,
            host: ctx.host,
            port: ctx.port,
            target,
            headers,
            extensions: ctx.extensions,
        })
    }
}

fn validate_target(target: &str) -> Result<(), ProxyError> {
    if !target.starts_with('/') {
        return Err(ProxyError::InvalidRequest(format!(
            "request path must start with '/': {target:?}"
        )));
    }
    // visible ASCII only; anything else must arrive percent-encoded
    if !target.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(ProxyError::InvalidRequest(format!(
            "request path contains whitespace, control or non-ASCII characters: {target:?}"
        )));
    }
    Ok(())
}
