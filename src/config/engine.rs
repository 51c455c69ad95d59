//! Runtime engine configuration.
//!
//! Built once from [`UpstreamConfig`] and shared read-only. Everything that
//! can fail (URI parsing, PEM loading, rustls setup) fails here, before the
//! first request.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;

use crate::config::schema::UpstreamConfig;
use crate::error::ProxyError;
use crate::net::tls::{self, ClientIdentity, TlsVersion};
use crate::routing::resolver::Origin;

/// Immutable engine settings.
#[derive(Clone)]
pub struct EngineConfig {
    pub streaming: bool,
    pub backend: Option<Origin>,
    pub read_timeout: Duration,
    pub rewrite_host: bool,
    pub max_header_bytes: usize,
    pub tls_verify: bool,
    pub tls_version: Option<TlsVersion>,
    pub client_identity: Option<ClientIdentity>,
    verified: Arc<ClientConfig>,
    unverified: Arc<ClientConfig>,
}

impl EngineConfig {
    pub fn from_upstream(upstream: &UpstreamConfig) -> Result<Self, ProxyError> {
        if upstream.read_timeout_ms == 0 {
            return Err(ProxyError::Configuration(
                "read_timeout_ms must be greater than zero".into(),
            ));
        }

        let backend = upstream.backend.as_deref().map(Origin::parse).transpose()?;
        let tls_version = upstream
            .tls
            .version
            .as_deref()
            .map(str::parse::<TlsVersion>)
            .transpose()?;

        let client_identity = match (&upstream.tls.client_certificate, &upstream.tls.client_key) {
            (Some(cert), Some(key)) => Some(ClientIdentity::from_pem_files(
                Path::new(cert),
                Path::new(key),
            )?),
            (None, None) => None,
            _ => {
                return Err(ProxyError::Configuration(
                    "client_certificate and client_key must be set together".into(),
                ))
            }
        };

        let extra_roots = match &upstream.tls.ca_certificate {
            Some(path) => tls::load_certificates(Path::new(path))?,
            None => Vec::new(),
        };

        let verified = tls::client_config(true, tls_version, client_identity.as_ref(), &extra_roots)?;
        let unverified =
            tls::client_config(false, tls_version, client_identity.as_ref(), &extra_roots)?;

        let config = Self {
            streaming: upstream.streaming,
            backend,
            read_timeout: Duration::from_millis(upstream.read_timeout_ms),
            rewrite_host: upstream.rewrite_host,
            max_header_bytes: upstream.max_header_bytes,
            tls_verify: !upstream.tls.verify_none,
            tls_version,
            client_identity,
            verified: Arc::new(verified),
            unverified: Arc::new(unverified),
        };

        tracing::debug!(
            backend = ?config.backend.as_ref().map(ToString::to_string),
            streaming = config.streaming,
            read_timeout_ms = upstream.read_timeout_ms,
            tls_verify = config.tls_verify,
            "Engine configuration built"
        );

        Ok(config)
    }

    /// Prepared client configuration with or without certificate checks.
    pub fn tls_client_config(&self, verify: bool) -> Arc<ClientConfig> {
        if verify {
            Arc::clone(&self.verified)
        } else {
            Arc::clone(&self.unverified)
        }
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_backend(mut self, backend: Option<Origin>) -> Self {
        self.backend = backend;
        self
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("streaming", &self.streaming)
            .field("backend", &self.backend)
            .field("read_timeout", &self.read_timeout)
            .field("rewrite_host", &self.rewrite_host)
            .field("max_header_bytes", &self.max_header_bytes)
            .field("tls_verify", &self.tls_verify)
            .field("tls_version", &self.tls_version)
            .field("client_identity", &self.client_identity.is_some())
            .finish()
    }
}
