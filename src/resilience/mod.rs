//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → timeouts.rs (connect, TLS handshake, writes, head receipt, body reads)
//!     → On failure: request ends with a typed error
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every backend I/O step has a deadline
//! - No retries, backoff or circuit breaking: a failed request stays failed
//!   and the host decides what to do with it

pub mod timeouts;
