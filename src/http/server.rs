//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum Router with a single catch-all handler
//! - Wire up middleware (tracing, request ID)
//! - Convert between axum requests/responses and the engine's types
//! - Map engine errors to status codes
//! - Stop accepting on shutdown and drain in-flight requests
//!
//! The inbound side goes through hyper, which lowercases header names; the
//! engine preserves whatever casing it is given from here on.

use std::str::FromStr;

use axum::{
    body::Body as AxumBody,
    extract::{Request, State},
    http::{header, uri::Authority},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::config::{EngineConfig, ProxyConfig};
use crate::engine::ProxyEngine;
use crate::error::ProxyError;
use crate::hooks::Hooks;
use crate::http::body::{Body, ResponseBody};
use crate::http::context::RequestContext;
use crate::http::headers::HeaderList;
use crate::http::response::ProxyResponse;
use crate::routing::matcher::AndMatcher;
use crate::routing::resolver::{Origin, Scheme};

/// Header carrying the request ID, set when the client did not send one.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Application state injected into handlers.
#[derive(Clone)]
struct AppState {
    engine: ProxyEngine,
}

/// Axum host for a [`ProxyEngine`].
pub struct HttpServer {
    router: Router,
    engine: ProxyEngine,
}

impl HttpServer {
    pub fn new(engine: ProxyEngine) -> Self {
        let router = Self::build_router(AppState {
            engine: engine.clone(),
        });
        Self { router, engine }
    }

    /// Engine with identity hooks and the configured pass-through rule.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ProxyError> {
        let engine_config = EngineConfig::from_upstream(&config.upstream)?;
        let hooks = Hooks::new().with_predicate(AndMatcher::from_rules(&config.proxy));
        Ok(Self::new(ProxyEngine::new(engine_config).with_hooks(hooks)))
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    pub fn engine(&self) -> &ProxyEngine {
        &self.engine
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn proxy_handler(State(state): State<AppState>, request: Request) -> Response {
    let ctx = match context_from_request(request) {
        Ok(ctx) => ctx,
        Err(e) => return error_response(e),
    };
    let request_id = ctx.id;

    match state.engine.handle(ctx).await {
        Ok(response) => into_http_response(response),
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Proxy request failed");
            error_response(e)
        }
    }
}

/// Convert an axum request into the engine's context.
///
/// The body stays lazy: it is pulled from the client only as the backend
/// accepts it.
pub fn context_from_request(request: Request) -> Result<RequestContext, ProxyError> {
    let (parts, body) = request.into_parts();

    let id = parts
        .headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or_else(Uuid::new_v4);

    let scheme = match parts.uri.scheme_str() {
        Some(s) => Scheme::from_str(s)?,
        None => Scheme::Http,
    };

    let authority = match parts.uri.authority() {
        Some(authority) => Some(authority.clone()),
        None => parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                Authority::from_str(v)
                    .map_err(|_| ProxyError::InvalidRequest(format!("invalid Host header {v:?}")))
            })
            .transpose()?,
    };
    let (host, port) = match &authority {
        Some(authority) => {
            let origin = Origin::new(scheme, authority.host(), None);
            (origin.host, authority.port_u16())
        }
        None => (String::new(), None),
    };

    let has_body = parts.headers.contains_key(header::TRANSFER_ENCODING)
        || parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .is_some_and(|len| len > 0);
    let body = if has_body {
        Body::from_stream(body.into_data_stream())
    } else {
        Body::Empty
    };

    Ok(RequestContext {
        id,
        method: parts.method,
        scheme,
        host,
        port,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: HeaderList::from_header_map(&parts.headers),
        body,
        extensions: parts.extensions,
    })
}

/// Convert the engine's response into an axum response. Live bodies are
/// streamed chunk by chunk.
pub fn into_http_response(response: ProxyResponse) -> Response {
    let ProxyResponse {
        status,
        headers,
        body,
    } = response;

    let body = match body {
        ResponseBody::Full(bytes) => AxumBody::from(bytes),
        live => AxumBody::from_stream(live.into_stream()),
    };

    let mut http_response = Response::new(body);
    *http_response.status_mut() = status;
    *http_response.headers_mut() = headers.to_header_map();
    http_response
}

fn error_response(error: ProxyError) -> Response {
    (error.status_code(), error.to_string()).into_response()
}
