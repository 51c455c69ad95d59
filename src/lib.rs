//! Request/response-rewriting reverse-proxy engine.
//!
//! A [`ProxyEngine`] takes an inbound [`RequestContext`], lets a request hook
//! rewrite it, forwards it to a backend over HTTP or TLS, and hands the
//! backend's response (buffered or live) through a response hook back to the
//! caller.

pub mod config;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod routing;

pub use config::{EngineConfig, ProxyConfig};
pub use engine::{ProxyEngine, ProxyState};
pub use error::{BoxError, ProxyError};
pub use hooks::{Downstream, HookError, Hooks, ProxyPredicate, RequestRewriter, ResponseRewriter};
pub use http::{
    BackendOverride, Body, HeaderList, HttpServer, ProxyResponse, RequestContext, ResponseBody,
    SkipTlsVerify,
};
pub use lifecycle::Shutdown;
