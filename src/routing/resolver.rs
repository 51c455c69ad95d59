//! Backend resolution.
//!
//! # Responsibilities
//! - Decide where a translated request goes: per-request override first,
//!   then the configured backend, then the request's own origin
//! - Attach the TLS policy and timeout that apply to this call
//!
//! # Design Decisions
//! - Pure computation; no DNS, no I/O
//! - A `SkipTlsVerify` extension on the request wins over configuration for
//!   that call only

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;
use url::Url;

use crate::config::EngineConfig;
use crate::error::ProxyError;
use crate::http::context::{BackendOverride, SkipTlsVerify};
use crate::http::request::OutboundRequest;
use crate::net::tls::TlsVersion;

/// URI scheme of an origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl FromStr for Scheme {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("http") {
            Ok(Scheme::Http)
        } else if s.eq_ignore_ascii_case("https") {
            Ok(Scheme::Https)
        } else {
            Err(ProxyError::InvalidRequest(format!("unsupported scheme {s:?}")))
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheme, host and port of a backend.
///
/// `host` never carries IPv6 brackets; [`Origin::authority`] adds them back.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Origin {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: Option<u16>) -> Self {
        let host = host.into();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .map(str::to_string)
            .unwrap_or(host);
        Self {
            scheme,
            host,
            port: port.unwrap_or_else(|| scheme.default_port()),
        }
    }

    /// Parse an origin URI such as `https://internal:9000`.
    ///
    /// Only a bare origin is accepted: a path other than `/`, a query or
    /// credentials are configuration errors.
    pub fn parse(uri: &str) -> Result<Self, ProxyError> {
        let url = Url::parse(uri)
            .map_err(|e| ProxyError::Configuration(format!("invalid backend URI {uri:?}: {e}")))?;

        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(ProxyError::Configuration(format!(
                    "backend URI {uri:?} has unsupported scheme {other:?}"
                )))
            }
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProxyError::Configuration(format!("backend URI {uri:?} has no host")))?;
        if url.path() != "/" || url.query().is_some() || !url.username().is_empty() {
            return Err(ProxyError::Configuration(format!(
                "backend URI {uri:?} must be an origin (scheme, host and port only)"
            )));
        }

        Ok(Self::new(scheme, host, url.port()))
    }

    fn bracketed_host(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }

    /// `host:port`, always with the port.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.bracketed_host(), self.port)
    }

    /// Value for a `Host` header: the port is omitted when it is the scheme's
    /// default.
    pub fn host_header(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.bracketed_host()
        } else {
            self.authority()
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())
    }
}

/// TLS settings for one backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsPolicy {
    pub verify: bool,
    pub version: Option<TlsVersion>,
    pub client_identity: bool,
}

/// Where and how a request is sent. Immutable once resolved.
#[derive(Clone)]
pub struct BackendTarget {
    pub origin: Origin,
    pub tls: TlsPolicy,
    /// Prepared client configuration; only set for `https` targets.
    pub tls_config: Option<Arc<ClientConfig>>,
    pub read_timeout: Duration,
    pub max_header_bytes: usize,
}

impl BackendTarget {
    pub fn is_tls(&self) -> bool {
        self.origin.scheme == Scheme::Https
    }
}

impl fmt::Debug for BackendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendTarget")
            .field("origin", &self.origin)
            .field("tls", &self.tls)
            .field("read_timeout", &self.read_timeout)
            .field("max_header_bytes", &self.max_header_bytes)
            .finish()
    }
}

/// Maps a translated request and the engine configuration to a target.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendResolver;

impl BackendResolver {
    pub fn resolve(
        outbound: &OutboundRequest,
        config: &EngineConfig,
    ) -> Result<BackendTarget, ProxyError> {
        let origin = if let Some(BackendOverride(origin)) = outbound.extensions.get() {
            origin.clone()
        } else if let Some(origin) = &config.backend {
            origin.clone()
        } else {
            if outbound.host.is_empty() {
                return Err(ProxyError::InvalidRequest(
                    "request has no host and no backend is configured".into(),
                ));
            }
            Origin::new(outbound.scheme, outbound.host.clone(), outbound.port)
        };

        let verify = match outbound.extensions.get::<SkipTlsVerify>() {
            Some(SkipTlsVerify(skip)) => !*skip,
            None => config.tls_verify,
        };

        let tls_config = match origin.scheme {
            Scheme::Https => Some(config.tls_client_config(verify)),
            Scheme::Http => None,
        };

        Ok(BackendTarget {
            origin,
            tls: TlsPolicy {
                verify,
                version: config.tls_version,
                client_identity: config.client_identity.is_some(),
            },
            tls_config,
            read_timeout: config.read_timeout,
            max_header_bytes: config.max_header_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamConfig;
    use crate::hooks::Hooks;
    use crate::http::context::RequestContext;
    use crate::http::request::RequestTranslator;
    use axum::http::Method;

    fn outbound(ctx: RequestContext) -> OutboundRequest {
        RequestTranslator::translate(ctx, &Hooks::default()).unwrap()
    }

    fn config(backend: Option<&str>) -> EngineConfig {
        let upstream = UpstreamConfig {
            backend: backend.map(str::to_string),
            ..UpstreamConfig::default()
        };
        EngineConfig::from_upstream(&upstream).unwrap()
    }

    #[test]
    fn same_origin_without_backend() {
        let ctx = RequestContext::new(Method::GET, "https://api.example.com/users").unwrap();
        let target = BackendResolver::resolve(&outbound(ctx), &config(None)).unwrap();

        assert_eq!(target.origin.scheme, Scheme::Https);
        assert_eq!(target.origin.host, "api.example.com");
        assert_eq!(target.origin.port, 443);
        assert!(target.tls.verify);
        assert!(target.tls_config.is_some());
        assert_eq!(target.read_timeout, Duration::from_secs(60));
    }

    #[test]
    fn configured_backend_wins_over_request_host() {
        let ctx = RequestContext::new(Method::GET, "https://api.example.com/users").unwrap();
        let target =
            BackendResolver::resolve(&outbound(ctx), &config(Some("http://internal:9000"))).unwrap();

        assert_eq!(target.origin, Origin::new(Scheme::Http, "internal", Some(9000)));
        assert!(target.tls_config.is_none());
    }

    #[test]
    fn override_extension_wins_over_configuration() {
        let ctx = RequestContext::new(Method::GET, "http://api.example.com/")
            .unwrap()
            .with_extension(BackendOverride(Origin::parse("https://other:8443").unwrap()));
        let target =
            BackendResolver::resolve(&outbound(ctx), &config(Some("http://internal:9000"))).unwrap();

        assert_eq!(target.origin.authority(), "other:8443");
        assert_eq!(target.origin.scheme, Scheme::Https);
    }

    #[test]
    fn skip_verify_extension_applies_to_one_call() {
        let config = config(Some("https://internal"));
        let skipped = RequestContext::new(Method::GET, "http://x/")
            .unwrap()
            .with_extension(SkipTlsVerify(true));
        let plain = RequestContext::new(Method::GET, "http://x/").unwrap();

        assert!(!BackendResolver::resolve(&outbound(skipped), &config).unwrap().tls.verify);
        assert!(BackendResolver::resolve(&outbound(plain), &config).unwrap().tls.verify);
    }

    #[test]
    fn origin_parsing() {
        let origin = Origin::parse("http://[::1]:8080").unwrap();
        assert_eq!(origin.host, "::1");
        assert_eq!(origin.authority(), "[::1]:8080");
        assert_eq!(origin.host_header(), "[::1]:8080");

        assert_eq!(Origin::parse("https://example.com").unwrap().host_header(), "example.com");
        assert!(matches!(Origin::parse("ftp://x"), Err(ProxyError::Configuration(_))));
        assert!(matches!(Origin::parse("not a uri"), Err(ProxyError::Configuration(_))));
        assert!(matches!(Origin::parse("http://x/api"), Err(ProxyError::Configuration(_))));
    }
}
