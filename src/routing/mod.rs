//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound RequestContext (host, path)
//!     → matcher.rs (should this request be proxied at all?)
//!
//! Translated OutboundRequest (+ extensions)
//!     → resolver.rs (override > configured backend > same origin)
//!     → Return: BackendTarget (origin, TLS policy, timeout)
//! ```
//!
//! # Design Decisions
//! - Matchers compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always resolves to the same target

pub mod matcher;
pub mod resolver;

pub use matcher::AndMatcher;
pub use resolver::{BackendResolver, BackendTarget, Origin, Scheme, TlsPolicy};
