//! The proxy engine.
//!
//! One [`ProxyEngine`] serves any number of concurrent requests. It holds
//! only immutable configuration, the hooks and an open-connection counter;
//! everything about a request lives in the future handling it.
//!
//! ```text
//! Start → Translated → Resolved → Connected → ResponseReceived → Rewritten → Delivered
//!   └──────────┴───────────┴──────────┴───────────────┴──────────────┴──→ Failed
//! ```
//!
//! A live body leaves the engine in `Rewritten`; the caller finishes the
//! delivery as it drains the stream.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;

use crate::config::EngineConfig;
use crate::error::ProxyError;
use crate::hooks::{Downstream, Hooks, NotFound};
use crate::http::context::RequestContext;
use crate::http::request::RequestTranslator;
use crate::http::response::{ProxyResponse, ResponseRelay};
use crate::net::executor::ConnectionExecutor;
use crate::observability::metrics::{self, Outcome};
use crate::routing::resolver::BackendResolver;

/// Where a request is in its journey through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Start,
    Translated,
    Resolved,
    Connected,
    ResponseReceived,
    Rewritten,
    Delivered,
    Failed,
}

impl ProxyState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProxyState::Delivered | ProxyState::Failed)
    }

    /// The state that follows on success, if any.
    pub fn next(&self) -> Option<ProxyState> {
        match self {
            ProxyState::Start => Some(ProxyState::Translated),
            ProxyState::Translated => Some(ProxyState::Resolved),
            ProxyState::Resolved => Some(ProxyState::Connected),
            ProxyState::Connected => Some(ProxyState::ResponseReceived),
            ProxyState::ResponseReceived => Some(ProxyState::Rewritten),
            ProxyState::Rewritten => Some(ProxyState::Delivered),
            ProxyState::Delivered | ProxyState::Failed => None,
        }
    }
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-request state tracker.
#[derive(Debug)]
struct Lifecycle {
    state: ProxyState,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: ProxyState::Start,
        }
    }

    fn advance(&mut self) {
        if let Some(next) = self.state.next() {
            tracing::trace!(from = %self.state, to = %next, "State transition");
            self.state = next;
        }
    }

    fn fail(&mut self, error: &ProxyError) {
        if !self.state.is_terminal() {
            tracing::warn!(state = %self.state, error = %error, "Proxy request failed");
            self.state = ProxyState::Failed;
        }
    }

    /// A buffered response is complete once handed over. A live body is
    /// still being relayed by the caller, so the request stays `Rewritten`.
    fn finish(&mut self, live: bool) {
        if live {
            tracing::trace!(state = %self.state, "Handed off with a live body");
        } else {
            self.advance();
        }
    }

    /// Record the outcome of one stage.
    fn step<T>(&mut self, result: Result<T, ProxyError>) -> Result<T, ProxyError> {
        match &result {
            Ok(_) => self.advance(),
            Err(e) => self.fail(e),
        }
        result
    }
}

/// Request/response-rewriting reverse-proxy engine.
#[derive(Clone)]
pub struct ProxyEngine {
    config: Arc<EngineConfig>,
    hooks: Hooks,
    downstream: Arc<dyn Downstream>,
    executor: ConnectionExecutor,
}

impl ProxyEngine {
    /// Engine with identity hooks and a 404 downstream.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(config),
            hooks: Hooks::default(),
            downstream: Arc::new(NotFound),
            executor: ConnectionExecutor::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_downstream(mut self, downstream: impl Downstream + 'static) -> Self {
        self.downstream = Arc::new(downstream);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Backend connections currently open on behalf of this engine (and its
    /// clones).
    pub fn open_connections(&self) -> u64 {
        self.executor.open_connections()
    }

    /// Entry point: proxy `ctx` if the predicate says so, otherwise hand it to
    /// the downstream handler.
    pub async fn handle(&self, ctx: RequestContext) -> Result<ProxyResponse, ProxyError> {
        let start = Instant::now();
        let method = ctx.method.to_string();
        let span = tracing::info_span!(
            "proxy",
            request_id = %ctx.id,
            method = %ctx.method,
            path = %ctx.path,
        );

        let (result, outcome) = async {
            if self.hooks.should_proxy_request(&ctx) {
                (self.proxy(ctx).await, Outcome::Proxied)
            } else {
                tracing::debug!("Request passed through to downstream");
                (self.downstream.call(ctx).await, Outcome::PassedThrough)
            }
        }
        .instrument(span)
        .await;

        match &result {
            Ok(response) => metrics::record_request(&method, response.status.as_u16(), outcome, start),
            Err(e) => metrics::record_request(&method, e.status_code().as_u16(), Outcome::Failed, start),
        }
        result
    }

    /// Run the proxy path unconditionally.
    pub async fn proxy(&self, ctx: RequestContext) -> Result<ProxyResponse, ProxyError> {
        let mut lifecycle = Lifecycle::new();

        let mut outbound = lifecycle.step(RequestTranslator::translate(ctx, &self.hooks))?;
        let target = lifecycle.step(BackendResolver::resolve(&outbound, &self.config))?;

        if self.config.rewrite_host {
            outbound.headers.insert("Host", target.origin.host_header());
        }

        let connection = lifecycle.step(self.executor.connect(&target).await)?;
        let handle = lifecycle.step(connection.send(outbound).await)?;
        tracing::debug!(backend = %target.origin, status = handle.status, "Backend responded");

        let response = lifecycle.step(
            ResponseRelay::relay(handle, &self.hooks, self.config.streaming).await,
        )?;
        lifecycle.finish(response.body.is_live());
        tracing::debug!(
            status = response.status.as_u16(),
            streaming = response.body.is_live(),
            state = %lifecycle.state,
            "Response handed to the caller"
        );
        Ok(response)
    }
}

impl fmt::Debug for ProxyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyEngine")
            .field("config", &self.config)
            .field("open_connections", &self.open_connections())
            .finish_non_exhaustive()
    }
}
