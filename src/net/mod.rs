//! Network layer subsystem (backend leg).
//!
//! # Data Flow
//! ```text
//! BackendTarget
//!     → executor.rs (TCP connect, per-request connection)
//!     → tls.rs (optional TLS handshake)
//!     → connection.rs (open-connection accounting)
//!     → codec.rs (request write, response head, body decoding)
//!     → ResponseHandle with a live BackendBody
//!
//! Connection States:
//!     Connecting → Handshaking → Writing → AwaitingHead → Streaming → Closed
//! ```
//!
//! # Design Decisions
//! - One connection per request, always closed afterwards
//! - The body source owns the socket, so cancellation is a drop

pub mod codec;
pub mod connection;
pub mod executor;
pub mod tls;

pub use codec::BackendBody;
pub use executor::{ConnectionExecutor, ResponseHandle};
