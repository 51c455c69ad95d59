//! Failure injection: backends that misbehave at every stage.

use std::time::Duration;

use axum::http::{Method, StatusCode};
use tokio::io::AsyncWriteExt;

use rewrite_proxy::config::EngineConfig;
use rewrite_proxy::{ProxyEngine, ProxyError, RequestContext};

mod common;

fn engine_for(addr: std::net::SocketAddr, streaming: bool) -> ProxyEngine {
    let mut upstream = common::upstream_to(addr);
    upstream.streaming = streaming;
    ProxyEngine::new(EngineConfig::from_upstream(&upstream).unwrap())
}

fn get() -> RequestContext {
    RequestContext::new(Method::GET, "http://front/").unwrap()
}

#[tokio::test]
async fn test_close_before_head() {
    let (addr, _) = common::spawn_backend(|mut conn| async move {
        let _ = common::read_head(&mut conn).await;
        let _ = conn.shutdown().await;
    })
    .await;

    let err = engine_for(addr, true).handle(get()).await.unwrap_err();
    assert!(matches!(err, ProxyError::Protocol(_)), "{err}");
}

#[tokio::test]
async fn test_close_mid_body_streaming() {
    let (addr, _) = common::spawn_backend(|mut conn| async move {
        let _ = common::read_head(&mut conn).await;
        let _ = conn
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 50\r\n\r\nonly part")
            .await;
        let _ = conn.shutdown().await;
    })
    .await;

    let engine = engine_for(addr, true);
    let response = engine.handle(get()).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);

    let err = response.body.collect().await.unwrap_err();
    assert!(matches!(err, ProxyError::Protocol(_)), "{err}");
    assert_eq!(engine.open_connections(), 0);
}

#[tokio::test]
async fn test_close_mid_body_buffered() {
    let (addr, _) = common::spawn_backend(|mut conn| async move {
        let _ = common::read_head(&mut conn).await;
        let _ = conn
            .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nA\r\nshort")
            .await;
        let _ = conn.shutdown().await;
    })
    .await;

    let engine = engine_for(addr, false);
    let err = engine.handle(get()).await.unwrap_err();
    assert!(matches!(err, ProxyError::Protocol(_)), "{err}");
    assert_eq!(engine.open_connections(), 0);
}

#[tokio::test]
async fn test_conflicting_content_length() {
    let (addr, _) = common::spawn_fixed_backend(
        "HTTP/1.1 200 OK\r\nContent-Length: 3\r\nContent-Length: 4\r\n\r\nabcd",
    )
    .await;

    let err = engine_for(addr, true).handle(get()).await.unwrap_err();
    assert!(matches!(err, ProxyError::Protocol(_)), "{err}");
}

#[tokio::test]
async fn test_oversized_head() {
    let (addr, _) = common::spawn_backend(|mut conn| async move {
        let _ = common::read_head(&mut conn).await;
        let _ = conn.write_all(b"HTTP/1.1 200 OK\r\n").await;
        let filler = format!("X-Filler: {}\r\n", "a".repeat(1000));
        for _ in 0..100 {
            if conn.write_all(filler.as_bytes()).await.is_err() {
                return;
            }
        }
    })
    .await;

    let mut upstream = common::upstream_to(addr);
    upstream.max_header_bytes = 16 * 1024;
    let engine = ProxyEngine::new(EngineConfig::from_upstream(&upstream).unwrap());

    let err = engine.handle(get()).await.unwrap_err();
    assert!(err.to_string().contains("exceeds"), "{err}");
}

#[tokio::test]
async fn test_no_retry_after_failure() {
    let (addr, accepted) = common::spawn_backend(|mut conn| async move {
        let _ = common::read_head(&mut conn).await;
        let _ = conn.write_all(b"garbage\r\n\r\n").await;
    })
    .await;

    let engine = engine_for(addr, true);
    assert!(engine.handle(get()).await.is_err());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(accepted.get(), 1);
}

#[tokio::test]
async fn test_unsupported_transfer_coding() {
    let (addr, _) = common::spawn_fixed_backend(
        "HTTP/1.1 200 OK\r\nTransfer-Encoding: gzip\r\n\r\ncompressed bytes",
    )
    .await;

    let engine = engine_for(addr, true);
    let err = engine.handle(get()).await.unwrap_err();
    assert!(matches!(err, ProxyError::Protocol(_)), "{err}");
    assert_eq!(engine.open_connections(), 0);
}
