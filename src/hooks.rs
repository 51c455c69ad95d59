//! Caller-supplied hooks.
//!
//! Three strategies are injected into the engine at construction:
//! - [`RequestRewriter`] turns the inbound context into the one to forward
//! - [`ResponseRewriter`] turns the backend response into the one to deliver
//! - [`ProxyPredicate`] decides whether a request is proxied at all
//!
//! Requests the predicate rejects go to a [`Downstream`] handler instead.
//! Closures implement every trait, so simple hooks need no named type.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::http::StatusCode;
use futures_util::future::BoxFuture;

use crate::error::{BoxError, ProxyError};
use crate::http::context::RequestContext;
use crate::http::response::ProxyResponse;

/// Error type hooks return. It reaches the caller as the source of
/// [`ProxyError::Hook`].
pub type HookError = BoxError;

pub trait RequestRewriter: Send + Sync {
    fn rewrite_request(&self, ctx: RequestContext) -> Result<RequestContext, HookError>;
}

impl<F> RequestRewriter for F
where
    F: Fn(RequestContext) -> Result<RequestContext, HookError> + Send + Sync,
{
    fn rewrite_request(&self, ctx: RequestContext) -> Result<RequestContext, HookError> {
        self(ctx)
    }
}

/// Sees the response after hop-by-hop headers were stripped. In streaming
/// mode the body is still live; replacing or dropping it closes the backend
/// connection.
pub trait ResponseRewriter: Send + Sync {
    fn rewrite_response(&self, response: ProxyResponse) -> Result<ProxyResponse, HookError>;
}

impl<F> ResponseRewriter for F
where
    F: Fn(ProxyResponse) -> Result<ProxyResponse, HookError> + Send + Sync,
{
    fn rewrite_response(&self, response: ProxyResponse) -> Result<ProxyResponse, HookError> {
        self(response)
    }
}

pub trait ProxyPredicate: Send + Sync {
    fn should_proxy(&self, ctx: &RequestContext) -> bool;
}

impl<F> ProxyPredicate for F
where
    F: Fn(&RequestContext) -> bool + Send + Sync,
{
    fn should_proxy(&self, ctx: &RequestContext) -> bool {
        self(ctx)
    }
}

/// Handles requests that are not proxied.
pub trait Downstream: Send + Sync {
    fn call(&self, ctx: RequestContext) -> BoxFuture<'static, Result<ProxyResponse, ProxyError>>;
}

impl<F, Fut> Downstream for F
where
    F: Fn(RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ProxyResponse, ProxyError>> + Send + 'static,
{
    fn call(&self, ctx: RequestContext) -> BoxFuture<'static, Result<ProxyResponse, ProxyError>> {
        Box::pin(self(ctx))
    }
}

/// Returns the request or response unchanged and proxies everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl RequestRewriter for Identity {
    fn rewrite_request(&self, ctx: RequestContext) -> Result<RequestContext, HookError> {
        Ok(ctx)
    }
}

impl ResponseRewriter for Identity {
    fn rewrite_response(&self, response: ProxyResponse) -> Result<ProxyResponse, HookError> {
        Ok(response)
    }
}

impl ProxyPredicate for Identity {
    fn should_proxy(&self, _ctx: &RequestContext) -> bool {
        true
    }
}

/// Default downstream: answers 404.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFound;

impl Downstream for NotFound {
    fn call(&self, ctx: RequestContext) -> BoxFuture<'static, Result<ProxyResponse, ProxyError>> {
        tracing::debug!(request_id = %ctx.id, path = %ctx.path, "No matching route found");
        Box::pin(async {
            Ok(ProxyResponse::full(
                StatusCode::NOT_FOUND,
                "No matching route found",
            ))
        })
    }
}

/// The set of hooks an engine runs.
#[derive(Clone)]
pub struct Hooks {
    request: Arc<dyn RequestRewriter>,
    response: Arc<dyn ResponseRewriter>,
    predicate: Arc<dyn ProxyPredicate>,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            request: Arc::new(Identity),
            response: Arc::new(Identity),
            predicate: Arc::new(Identity),
        }
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a closure as the request hook.
    pub fn on_request<F>(self, hook: F) -> Self
    where
        F: Fn(RequestContext) -> Result<RequestContext, HookError> + Send + Sync + 'static,
    {
        self.with_request_rewriter(hook)
    }

    /// Use a closure as the response hook.
    pub fn on_response<F>(self, hook: F) -> Self
    where
        F: Fn(ProxyResponse) -> Result<ProxyResponse, HookError> + Send + Sync + 'static,
    {
        self.with_response_rewriter(hook)
    }

    /// Use a closure as the should-proxy predicate.
    pub fn should_proxy<F>(self, predicate: F) -> Self
    where
        F: Fn(&RequestContext) -> bool + Send + Sync + 'static,
    {
        self.with_predicate(predicate)
    }

    pub fn with_request_rewriter(mut self, hook: impl RequestRewriter + 'static) -> Self {
        self.request = Arc::new(hook);
        self
    }

    pub fn with_response_rewriter(mut self, hook: impl ResponseRewriter + 'static) -> Self {
        self.response = Arc::new(hook);
        self
    }

    pub fn with_predicate(mut self, predicate: impl ProxyPredicate + 'static) -> Self {
        self.predicate = Arc::new(predicate);
        self
    }

    pub fn rewrite_request(&self, ctx: RequestContext) -> Result<RequestContext, ProxyError> {
        self.request.rewrite_request(ctx).map_err(ProxyError::Hook)
    }

    pub fn rewrite_response(&self, response: ProxyResponse) -> Result<ProxyResponse, ProxyError> {
        self.response.rewrite_response(response).map_err(ProxyError::Hook)
    }

    pub fn should_proxy_request(&self, ctx: &RequestContext) -> bool {
        self.predicate.should_proxy(ctx)
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}
