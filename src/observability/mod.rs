//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Engine stages produce:
//!     → tracing spans and events (request id, stage, backend, status)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every span of a proxied request
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
