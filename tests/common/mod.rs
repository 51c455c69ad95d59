//! Shared utilities for integration tests: raw-TCP and TLS mock backends.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::RootCertStore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use rewrite_proxy::config::UpstreamConfig;

/// A backend-side connection, plain or TLS.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

pub type Conn = Box<dyn Stream>;

/// Accepted connections, for asserting that no connection was attempted.
#[derive(Clone, Default)]
pub struct AcceptCounter(Arc<AtomicUsize>);

impl AcceptCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Start a raw-TCP backend on an ephemeral port. `handler` runs once per
/// accepted connection.
pub async fn spawn_backend<F, Fut>(handler: F) -> (SocketAddr, AcceptCounter)
where
    F: Fn(Conn) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let counter = AcceptCounter::default();
    let accepted = counter.clone();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            accepted.0.fetch_add(1, Ordering::SeqCst);
            let handler = handler.clone();
            tokio::spawn(async move { handler(Box::new(socket)).await });
        }
    });

    (addr, counter)
}

/// Start a backend that answers every request with `response` verbatim.
pub async fn spawn_fixed_backend(response: &'static str) -> (SocketAddr, AcceptCounter) {
    spawn_backend(move |mut conn| async move {
        let _ = read_head(&mut conn).await;
        let _ = conn.write_all(response.as_bytes()).await;
        let _ = conn.shutdown().await;
    })
    .await
}

/// Read a request head. Returns the head text and any bytes read past it.
pub async fn read_head(conn: &mut Conn) -> (String, Vec<u8>) {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        if let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            let rest = data.split_off(end + 4);
            return (String::from_utf8_lossy(&data).into_owned(), rest);
        }
        let n = conn.read(&mut buf).await.unwrap();
        assert!(n > 0, "client closed before sending a full request head");
        data.extend_from_slice(&buf[..n]);
    }
}

/// Keep reading until `data` ends with `terminator`.
pub async fn read_until(conn: &mut Conn, mut data: Vec<u8>, terminator: &[u8]) -> Vec<u8> {
    let mut buf = [0u8; 1024];
    while !data.ends_with(terminator) {
        let n = conn.read(&mut buf).await.unwrap();
        assert!(n > 0, "client closed early");
        data.extend_from_slice(&buf[..n]);
    }
    data
}

/// True when the peer closes the connection within `limit`.
pub async fn peer_closes_within(conn: &mut Conn, limit: Duration) -> bool {
    let mut buf = [0u8; 1024];
    let closed = async {
        loop {
            match conn.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    };
    tokio::time::timeout(limit, closed).await.is_ok()
}

/// Upstream settings pointing at a plain backend.
pub fn upstream_to(addr: SocketAddr) -> UpstreamConfig {
    UpstreamConfig {
        backend: Some(format!("http://{addr}")),
        read_timeout_ms: 5_000,
        ..UpstreamConfig::default()
    }
}

/// A throwaway CA plus a `localhost` server certificate and a client
/// certificate, all written to a temporary directory as PEM.
pub struct TestPki {
    pub dir: PathBuf,
    pub ca_der: CertificateDer<'static>,
    pub server_chain: Vec<CertificateDer<'static>>,
    pub server_key: Vec<u8>,
}

impl TestPki {
    pub fn generate(name: &str) -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "rewrite-proxy test CA");
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let server_key = KeyPair::generate().unwrap();
        let server_cert = CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .signed_by(&server_key, &ca_cert, &ca_key)
            .unwrap();

        let client_key = KeyPair::generate().unwrap();
        let mut client_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        client_params
            .distinguished_name
            .push(DnType::CommonName, "rewrite-proxy test client");
        let client_cert = client_params
            .signed_by(&client_key, &ca_cert, &ca_key)
            .unwrap();

        let dir = std::env::temp_dir().join(format!(
            "rewrite-proxy-{name}-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("ca.pem"), ca_cert.pem()).unwrap();
        std::fs::write(dir.join("client.pem"), client_cert.pem()).unwrap();
        std::fs::write(dir.join("client-key.pem"), client_key.serialize_pem()).unwrap();

        Self {
            dir,
            ca_der: ca_cert.der().clone(),
            server_chain: vec![server_cert.der().clone()],
            server_key: server_key.serialize_der(),
        }
    }

    pub fn path(&self, file: &str) -> String {
        self.dir.join(file).to_string_lossy().into_owned()
    }

    fn server_config(&self, require_client_cert: bool) -> rustls::ServerConfig {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = rustls::ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .unwrap();
        let builder = if require_client_cert {
            let mut roots = RootCertStore::empty();
            roots.add(self.ca_der.clone()).unwrap();
            let verifier =
                rustls::server::WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                    .build()
                    .unwrap();
            builder.with_client_cert_verifier(verifier)
        } else {
            builder.with_no_client_auth()
        };
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.server_key.clone()));
        builder
            .with_single_cert(self.server_chain.clone(), key)
            .unwrap()
    }
}

/// Start a TLS backend for `localhost`. Failed handshakes are dropped.
pub async fn spawn_tls_backend<F, Fut>(
    pki: &TestPki,
    require_client_cert: bool,
    handler: F,
) -> SocketAddr
where
    F: Fn(Conn) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let acceptor = TlsAcceptor::from(Arc::new(pki.server_config(require_client_cert)));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Ok(stream) = acceptor.accept(socket).await {
                    handler(Box::new(stream)).await;
                }
            });
        }
    });

    addr
}

/// Handler answering `200 OK` with body `secure`.
pub async fn answer_secure(mut conn: Conn) {
    let _ = read_head(&mut conn).await;
    let _ = conn
        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nsecure")
        .await;
    let _ = conn.shutdown().await;
}
