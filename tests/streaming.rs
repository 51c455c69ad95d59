//! Streaming relay, timeouts and cancellation.

use std::time::{Duration, Instant};

use axum::http::Method;
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;

use rewrite_proxy::config::EngineConfig;
use rewrite_proxy::resilience::timeouts::Stage;
use rewrite_proxy::{ProxyEngine, ProxyError, RequestContext};

mod common;

fn engine_for(upstream: &rewrite_proxy::config::UpstreamConfig) -> ProxyEngine {
    ProxyEngine::new(EngineConfig::from_upstream(upstream).unwrap())
}

fn get() -> RequestContext {
    RequestContext::new(Method::GET, "http://front/stream").unwrap()
}

#[tokio::test]
async fn chunks_are_delivered_in_order_as_they_arrive() {
    let (gate_tx, gate_rx) = oneshot::channel::<()>();
    let gate_rx = std::sync::Mutex::new(Some(gate_rx));
    let (addr, _) = common::spawn_backend(move |mut conn| {
        let gate = gate_rx.lock().unwrap().take();
        async move {
            let _ = common::read_head(&mut conn).await;
            conn.write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\npart1\r\n")
                .await
                .unwrap();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            conn.write_all(b"5\r\npart2\r\n0\r\n\r\n").await.unwrap();
        }
    })
    .await;

    let engine = engine_for(&common::upstream_to(addr));
    let response = engine.handle(get()).await.unwrap();
    assert!(response.body.is_live());

    let mut body = response.body.into_stream();
    let first = body.next().await.unwrap().unwrap();
    assert_eq!(&first[..], b"part1");
    assert_eq!(engine.open_connections(), 1);

    gate_tx.send(()).unwrap();
    let second = body.next().await.unwrap().unwrap();
    assert_eq!(&second[..], b"part2");
    assert!(body.next().await.is_none());
    assert_eq!(engine.open_connections(), 0);
}

#[tokio::test]
async fn stalled_head_times_out_and_closes_connection() {
    let (closed_tx, closed_rx) = oneshot::channel();
    let closed_tx = std::sync::Mutex::new(Some(closed_tx));
    let (addr, _) = common::spawn_backend(move |mut conn| {
        let tx = closed_tx.lock().unwrap().take();
        async move {
            let _ = common::read_head(&mut conn).await;
            let closed = common::peer_closes_within(&mut conn, Duration::from_millis(500)).await;
            if let Some(tx) = tx {
                let _ = tx.send(closed);
            }
            let _ = conn.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
        }
    })
    .await;

    let mut upstream = common::upstream_to(addr);
    upstream.read_timeout_ms = 200;
    let engine = engine_for(&upstream);

    let started = Instant::now();
    let err = engine.handle(get()).await.unwrap_err();
    let elapsed = started.elapsed();

    match err {
        ProxyError::Timeout { stage, after } => {
            assert_eq!(stage, Stage::ResponseHead);
            assert_eq!(after, Duration::from_millis(200));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(elapsed >= Duration::from_millis(190), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(450), "{elapsed:?}");
    assert_eq!(engine.open_connections(), 0);
    assert!(closed_rx.await.unwrap(), "backend should observe the close");
}

#[tokio::test]
async fn interim_responses_do_not_extend_the_head_deadline() {
    let (addr, _) = common::spawn_backend(|mut conn| async move {
        let _ = common::read_head(&mut conn).await;
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if conn.write_all(b"HTTP/1.1 102 Processing\r\n\r\n").await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;

    let mut upstream = common::upstream_to(addr);
    upstream.read_timeout_ms = 200;
    let engine = engine_for(&upstream);

    let started = Instant::now();
    let result = tokio::time::timeout(Duration::from_secs(2), engine.handle(get()))
        .await
        .expect("interim responses kept the request alive");
    let elapsed = started.elapsed();

    match result {
        Err(ProxyError::Timeout { stage, after }) => {
            assert_eq!(stage, Stage::ResponseHead);
            assert_eq!(after, Duration::from_millis(200));
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(response) => panic!("unexpected response: {}", response.status),
    }
    assert!(elapsed < Duration::from_millis(450), "{elapsed:?}");
    assert_eq!(engine.open_connections(), 0);
}

#[tokio::test]
async fn stalled_body_times_out_mid_stream() {
    let (addr, _) = common::spawn_backend(|mut conn| async move {
        let _ = common::read_head(&mut conn).await;
        conn.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let _ = conn.write_all(b"defghij").await;
    })
    .await;

    let mut upstream = common::upstream_to(addr);
    upstream.read_timeout_ms = 200;
    let engine = engine_for(&upstream);

    let response = engine.handle(get()).await.unwrap();
    let mut body = response.body.into_stream();
    assert_eq!(&body.next().await.unwrap().unwrap()[..], b"abc");

    let err = body.next().await.unwrap().unwrap_err();
    assert!(
        matches!(err, ProxyError::Timeout { stage: Stage::ResponseBody, .. }),
        "{err}"
    );
    assert!(body.next().await.is_none());
    assert_eq!(engine.open_connections(), 0);
}

#[tokio::test]
async fn downstream_disconnect_closes_backend_connection() {
    let (closed_tx, closed_rx) = oneshot::channel();
    let closed_tx = std::sync::Mutex::new(Some(closed_tx));
    let (addr, _) = common::spawn_backend(move |mut conn| {
        let tx = closed_tx.lock().unwrap().take();
        async move {
            let _ = common::read_head(&mut conn).await;
            conn.write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n")
                .await
                .unwrap();
            // keep streaming until the proxy goes away
            let deadline = Instant::now() + Duration::from_secs(5);
            let mut closed = false;
            while Instant::now() < deadline {
                if conn.write_all(b"4\r\ntick\r\n").await.is_err() || conn.flush().await.is_err() {
                    closed = true;
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            if let Some(tx) = tx {
                let _ = tx.send(closed);
            }
        }
    })
    .await;

    let engine = engine_for(&common::upstream_to(addr));
    let response = engine.handle(get()).await.unwrap();

    let (mut client, mut sink) = tokio::io::duplex(64);
    let pipe = tokio::spawn(async move { response.body.pipe(&mut sink).await });

    let mut first = [0u8; 4];
    client.read_exact(&mut first).await.unwrap();
    assert_eq!(&first, b"tick");
    drop(client);

    let result = tokio::time::timeout(Duration::from_secs(2), pipe)
        .await
        .expect("pipe should stop after the consumer left")
        .unwrap();
    assert!(matches!(result, Err(ProxyError::Downstream(_))));
    assert_eq!(engine.open_connections(), 0);

    let closed = tokio::time::timeout(Duration::from_secs(5), closed_rx)
        .await
        .unwrap()
        .unwrap();
    assert!(closed, "backend should see the connection go away");
}

#[tokio::test]
async fn dropping_the_stream_releases_the_connection() {
    let (addr, _) = common::spawn_backend(|mut conn| async move {
        let _ = common::read_head(&mut conn).await;
        conn.write_all(b"HTTP/1.1 200 OK\r\n\r\nuntil close")
            .await
            .unwrap();
        let _ = common::peer_closes_within(&mut conn, Duration::from_secs(2)).await;
    })
    .await;

    let engine = engine_for(&common::upstream_to(addr));
    let response = engine.handle(get()).await.unwrap();

    let mut body = response.body.into_stream();
    assert!(body.next().await.unwrap().is_ok());
    assert_eq!(engine.open_connections(), 1);

    drop(body);
    assert_eq!(engine.open_connections(), 0);
}
