//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy binary.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Backend leg: where requests go and how they are sent.
    pub upstream: UpstreamConfig,

    /// Which requests are proxied; the rest get a 404.
    pub proxy: ProxyRuleConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Origin every request is sent to (e.g., "https://internal:9000").
    /// When unset, requests go to their own host.
    pub backend: Option<String>,

    /// Relay response bodies as they arrive instead of buffering them.
    pub streaming: bool,

    /// Deadline for each backend I/O step, in milliseconds.
    pub read_timeout_ms: u64,

    /// Set the outbound Host header to the backend's authority.
    pub rewrite_host: bool,

    /// Largest accepted response head (status line plus headers).
    pub max_header_bytes: usize,

    /// TLS towards https backends.
    pub tls: UpstreamTlsConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            backend: None,
            streaming: true,
            read_timeout_ms: 60_000,
            rewrite_host: false,
            max_header_bytes: 64 * 1024,
            tls: UpstreamTlsConfig::default(),
        }
    }
}

/// TLS configuration for backend connections.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UpstreamTlsConfig {
    /// Accept any backend certificate.
    pub verify_none: bool,

    /// Pin the protocol version ("1.2" or "1.3").
    pub version: Option<String>,

    /// Client certificate chain for mutual TLS (PEM).
    pub client_certificate: Option<String>,

    /// Private key for the client certificate (PEM).
    pub client_key: Option<String>,

    /// Extra CA certificates trusted besides the built-in roots (PEM).
    pub ca_certificate: Option<String>,
}

/// Conditions a request must meet to be proxied. Unset means "any".
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyRuleConfig {
    /// Host to match (exact, case-insensitive).
    pub host: Option<String>,

    /// Path prefix to match (case-sensitive).
    pub path_prefix: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a filter directive.
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
