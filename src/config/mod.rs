//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → engine.rs: EngineConfig::from_upstream (PEM files, rustls configs)
//!     → shared via Arc with every request
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod engine;
pub mod loader;
pub mod schema;
pub mod validation;

pub use engine::EngineConfig;
pub use schema::{
    ListenerConfig, ObservabilityConfig, ProxyConfig, ProxyRuleConfig, UpstreamConfig,
    UpstreamTlsConfig,
};
