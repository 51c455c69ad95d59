//! TLS towards backends: verification, per-request bypass, extra CA, mTLS.

use axum::http::{Method, StatusCode};
use bytes::Bytes;

use rewrite_proxy::config::{EngineConfig, UpstreamConfig};
use rewrite_proxy::{ProxyEngine, ProxyError, RequestContext, SkipTlsVerify};

mod common;

use common::TestPki;

fn upstream_tls(addr: std::net::SocketAddr) -> UpstreamConfig {
    UpstreamConfig {
        backend: Some(format!("https://localhost:{}", addr.port())),
        read_timeout_ms: 5_000,
        ..UpstreamConfig::default()
    }
}

fn get() -> RequestContext {
    RequestContext::new(Method::GET, "http://front/secret").unwrap()
}

async fn body_of(engine: &ProxyEngine, ctx: RequestContext) -> Result<Bytes, ProxyError> {
    let response = engine.handle(ctx).await?;
    assert_eq!(response.status, StatusCode::OK);
    response.body.collect().await
}

#[tokio::test]
async fn untrusted_certificate_is_rejected() {
    let pki = TestPki::generate("untrusted");
    let addr = common::spawn_tls_backend(&pki, false, common::answer_secure).await;

    let engine = ProxyEngine::new(EngineConfig::from_upstream(&upstream_tls(addr)).unwrap());
    let err = engine.handle(get()).await.unwrap_err();

    assert!(matches!(err, ProxyError::Tls { .. }), "{err}");
    assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(engine.open_connections(), 0);
}

#[tokio::test]
async fn skip_verify_extension_bypasses_checks_for_one_request() {
    let pki = TestPki::generate("skip-verify");
    let addr = common::spawn_tls_backend(&pki, false, common::answer_secure).await;
    let engine = ProxyEngine::new(EngineConfig::from_upstream(&upstream_tls(addr)).unwrap());

    let body = body_of(&engine, get().with_extension(SkipTlsVerify(true)))
        .await
        .unwrap();
    assert_eq!(&body[..], b"secure");

    // the next request is verified again
    assert!(matches!(
        engine.handle(get()).await,
        Err(ProxyError::Tls { .. })
    ));
}

#[tokio::test]
async fn configured_ca_is_trusted() {
    let pki = TestPki::generate("extra-ca");
    let addr = common::spawn_tls_backend(&pki, false, common::answer_secure).await;

    let mut upstream = upstream_tls(addr);
    upstream.tls.ca_certificate = Some(pki.path("ca.pem"));
    let engine = ProxyEngine::new(EngineConfig::from_upstream(&upstream).unwrap());

    let body = body_of(&engine, get()).await.unwrap();
    assert_eq!(&body[..], b"secure");
}

#[tokio::test]
async fn verify_none_with_pinned_version() {
    let pki = TestPki::generate("pinned");
    let addr = common::spawn_tls_backend(&pki, false, common::answer_secure).await;

    for version in ["1.2", "1.3"] {
        let mut upstream = upstream_tls(addr);
        upstream.tls.verify_none = true;
        upstream.tls.version = Some(version.to_string());
        let engine = ProxyEngine::new(EngineConfig::from_upstream(&upstream).unwrap());

        let body = body_of(&engine, get()).await.unwrap();
        assert_eq!(&body[..], b"secure", "TLS {version}");
    }
}

#[tokio::test]
async fn client_certificate_is_presented() {
    let pki = TestPki::generate("mtls");
    let addr = common::spawn_tls_backend(&pki, true, common::answer_secure).await;

    let mut anonymous = upstream_tls(addr);
    anonymous.tls.ca_certificate = Some(pki.path("ca.pem"));
    let engine = ProxyEngine::new(EngineConfig::from_upstream(&anonymous).unwrap());
    assert!(engine.handle(get()).await.is_err());

    let mut identified = anonymous.clone();
    identified.tls.client_certificate = Some(pki.path("client.pem"));
    identified.tls.client_key = Some(pki.path("client-key.pem"));
    let engine = ProxyEngine::new(EngineConfig::from_upstream(&identified).unwrap());

    let body = body_of(&engine, get()).await.unwrap();
    assert_eq!(&body[..], b"secure");
}
