//! Inbound request context.
//!
//! A `RequestContext` is what the host hands to the engine: the parsed
//! request line, ordered headers, a body source and typed extension flags.
//! It is owned by exactly one call.

use axum::http::{Extensions, Method};
use url::Url;
use uuid::Uuid;

use crate::error::ProxyError;
use crate::http::body::Body;
use crate::http::headers::HeaderList;
use crate::routing::resolver::{Origin, Scheme};

/// Per-request flag: accept any backend certificate for this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipTlsVerify(pub bool);

/// Per-request flag: send this call to the given origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOverride(pub Origin);

impl BackendOverride {
    pub fn parse(uri: &str) -> Result<Self, ProxyError> {
        Origin::parse(uri).map(Self)
    }
}

/// An inbound request as seen by the engine.
#[derive(Debug)]
pub struct RequestContext {
    /// Correlates every log line of this call.
    pub id: Uuid,
    pub method: Method,
    pub scheme: Scheme,
    /// Host without port and without IPv6 brackets.
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    /// Query string without the leading `?`.
    pub query: Option<String>,
    pub headers: HeaderList,
    pub body: Body,
    pub extensions: Extensions,
}

impl RequestContext {
    /// Build a context from an absolute URL. Headers start empty, the body
    /// empty.
    pub fn new(method: Method, url: &str) -> Result<Self, ProxyError> {
        let parsed = Url::parse(url)
            .map_err(|e| ProxyError::InvalidRequest(format!("invalid request URL {url:?}: {e}")))?;
        let scheme: Scheme = parsed.scheme().parse()?;
        let origin = Origin::new(scheme, parsed.host_str().unwrap_or_default(), parsed.port());

        Ok(Self {
            id: Uuid::new_v4(),
            method,
            scheme,
            host: origin.host,
            port: parsed.port(),
            path: parsed.path().to_string(),
            query: parsed.query().map(str::to_string),
            headers: HeaderList::new(),
            body: Body::Empty,
            extensions: Extensions::new(),
        })
    }

    /// Append a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Attach a typed extension, replacing one of the same type.
    pub fn with_extension<T>(mut self, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.extensions.insert(value);
        self
    }

    /// Port, falling back to the scheme's default.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.scheme.default_port())
    }

    /// Request-target in origin form.
    pub fn path_and_query(&self) -> String {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        match &self.query {
            Some(query) => format!("{path}?{query}"),
            None => path.to_string(),
        }
    }

    /// Move the body out, leaving the context with an empty one.
    pub fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }
}
