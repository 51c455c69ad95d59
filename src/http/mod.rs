//! HTTP request/response subsystem.
//!
//! # Data Flow
//! ```text
//! RequestContext (context.rs, headers.rs, body.rs)
//!     → request.rs (request hook, hop-by-hop stripping)
//!     → [routing resolves backend, net sends request]
//!     → response.rs (response hook, buffered or live body)
//!     → ProxyResponse
//!
//! server.rs: axum host converting to and from these types
//! ```

pub mod body;
pub mod context;
pub mod headers;
pub mod request;
pub mod response;
pub mod server;

pub use body::{Body, ResponseBody};
pub use context::{BackendOverride, RequestContext, SkipTlsVerify};
pub use headers::HeaderList;
pub use request::{OutboundRequest, RequestTranslator};
pub use response::{ProxyResponse, ResponseRelay};
pub use server::HttpServer;
