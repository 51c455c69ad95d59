//! Backend connection executor.
//!
//! # Responsibilities
//! - Open a fresh TCP connection per request, with TLS for `https` targets
//! - Write the request and wait for the response head
//! - Hand the body back as a pull source that owns the connection
//!
//! # Design Decisions
//! - No pooling: every request gets its own connection and sends
//!   `Connection: close`
//! - Every I/O step has its own deadline (`read_timeout`); receiving the
//!   response head, interim responses included, is one step
//! - Nothing is retried; the first failure ends the request

use std::fmt;
use std::time::Duration;

use bytes::BytesMut;
use tokio::net::TcpStream;

use crate::error::ProxyError;
use crate::http::headers::HeaderList;
use crate::http::request::OutboundRequest;
use crate::net::codec::{self, BackendBody, BoxedIo};
use crate::net::connection::{ConnectionGuard, ConnectionTracker};
use crate::net::tls;
use crate::resilience::timeouts::{with_timeout, Stage};
use crate::routing::resolver::BackendTarget;

/// Status line, headers and live body of a backend response.
#[derive(Debug)]
pub struct ResponseHandle {
    pub status: u16,
    pub reason: String,
    pub headers: HeaderList,
    pub body: BackendBody,
}

/// Opens backend connections and runs requests over them.
#[derive(Debug, Clone, Default)]
pub struct ConnectionExecutor {
    tracker: ConnectionTracker,
}

impl ConnectionExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend connections currently open, across all requests.
    pub fn open_connections(&self) -> u64 {
        self.tracker.open_count()
    }

    /// Connect, then send.
    pub async fn execute(
        &self,
        outbound: OutboundRequest,
        target: &BackendTarget,
    ) -> Result<ResponseHandle, ProxyError> {
        self.connect(target).await?.send(outbound).await
    }

    /// Establish the transport to `target`.
    pub async fn connect(&self, target: &BackendTarget) -> Result<BackendConnection, ProxyError> {
        let authority = target.origin.authority();
        let host = target.origin.host.as_str();

        let tcp = with_timeout(
            Stage::Connect,
            target.read_timeout,
            TcpStream::connect((host, target.origin.port)),
        )
        .await?
        .map_err(|source| ProxyError::Connection {
            target: authority.clone(),
            source,
        })?;
        let _ = tcp.set_nodelay(true);

        let guard = self.tracker.track(&authority);

        let io: BoxedIo = match &target.tls_config {
            Some(config) if target.is_tls() => {
                let stream =
                    tls::connect(config.clone(), host, tcp, target.read_timeout).await?;
                Box::new(stream)
            }
            _ => Box::new(tcp),
        };

        tracing::debug!(
            connection_id = %guard.id(),
            backend = %target.origin,
            tls_verify = target.tls.verify,
            "Backend connection established"
        );

        Ok(BackendConnection {
            io,
            guard,
            authority,
            host_header: target.origin.host_header(),
            read_timeout: target.read_timeout,
            max_header_bytes: target.max_header_bytes,
        })
    }
}

/// An open connection to one backend, good for exactly one request.
pub struct BackendConnection {
    io: BoxedIo,
    guard: ConnectionGuard,
    authority: String,
    host_header: String,
    read_timeout: Duration,
    max_header_bytes: usize,
}

impl BackendConnection {
    /// Write `outbound` and wait for the final response head.
    ///
    /// Interim 1xx responses are skipped, except 101 which is returned as is.
    /// The read timeout covers the interim responses and the final head
    /// together.
    pub async fn send(self, outbound: OutboundRequest) -> Result<ResponseHandle, ProxyError> {
        let Self {
            mut io,
            guard,
            authority,
            host_header,
            read_timeout,
            max_header_bytes,
        } = self;

        let OutboundRequest {
            method,
            target,
            mut headers,
            body,
            ..
        } = outbound;

        let chunked = codec::frame_request_body(&mut headers, &body);
        if !headers.contains("host") {
            headers.insert("Host", host_header);
        }
        headers.insert("Connection", "close");

        let head = codec::encode_head(&method, &target, &headers);
        codec::write_request(&mut *io, &authority, &head, body, chunked, read_timeout).await?;

        // one deadline for the final head, however many interim heads precede it
        let mut buf = BytesMut::with_capacity(8 * 1024);
        let head = with_timeout(Stage::ResponseHead, read_timeout, async {
            loop {
                let head =
                    codec::read_response_head(&mut *io, &authority, &mut buf, max_header_bytes)
                        .await?;
                if (100..200).contains(&head.status) && head.status != 101 {
                    tracing::trace!(status = head.status, "Skipping interim response");
                    continue;
                }
                break Ok::<_, ProxyError>(head);
            }
        })
        .await??;

        let framing = codec::response_framing(&method, head.status, &head.headers)?;
        tracing::debug!(
            connection_id = %guard.id(),
            status = head.status,
            framing = ?framing,
            "Response head received"
        );

        let body = BackendBody::new(io, buf, framing, read_timeout, authority, Some(guard));
        Ok(ResponseHandle {
            status: head.status,
            reason: head.reason,
            headers: head.headers,
            body,
        })
    }
}

impl fmt::Debug for BackendConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConnection")
            .field("authority", &self.authority)
            .field("connection_id", &self.guard.id())
            .finish()
    }
}
