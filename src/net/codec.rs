//! HTTP/1.1 wire codec for the backend leg.
//!
//! # Responsibilities
//! - Serialize the request head with header names exactly as given
//! - Frame the request body (Content-Length or chunked)
//! - Parse the response head incrementally with `httparse`
//! - Decode the response body (length, chunked or read-until-close) one
//!   read at a time, so callers can relay data as it arrives
//!
//! # Design Decisions
//! - Our own codec instead of a client library, because header casing has to
//!   survive the round trip
//! - Every read of a body goes through the read timeout individually
//! - The body owns the connection; dropping it closes the socket

use std::fmt;
use std::time::Duration;

use axum::http::Method;
use bytes::{Buf, Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProxyError;
use crate::http::body::Body;
use crate::http::headers::HeaderList;
use crate::net::connection::ConnectionGuard;
use crate::resilience::timeouts::{with_timeout, Stage};

const MAX_HEADERS: usize = 128;
const MAX_LINE_BYTES: usize = 8 * 1024;
const READ_CHUNK_BYTES: usize = 16 * 1024;

/// Byte stream to a backend, plain TCP or TLS.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

pub type BoxedIo = Box<dyn Io>;

/// Parsed response status line and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: HeaderList,
}

/// How the end of a response body is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Length(u64),
    Chunked,
    UntilClose,
}

/// Serialize a request head. Names and values are written verbatim.
pub fn encode_head(method: &Method, target: &str, headers: &HeaderList) -> Vec<u8> {
    let mut head = Vec::with_capacity(256);
    head.extend_from_slice(method.as_str().as_bytes());
    head.push(b' ');
    head.extend_from_slice(target.as_bytes());
    head.extend_from_slice(b" HTTP/1.1\r\n");
    for (name, value) in headers.iter() {
        head.extend_from_slice(name.as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");
    head
}

/// Decide request body framing and set the matching header.
///
/// Returns true when the body has to be chunk-encoded. A Content-Length
/// supplied by the caller is trusted as is.
pub fn frame_request_body(headers: &mut HeaderList, body: &Body) -> bool {
    if headers.contains("content-length") {
        return false;
    }
    match body.known_length() {
        Some(0) => false,
        Some(len) => {
            headers.insert("Content-Length", len.to_string());
            false
        }
        None => {
            headers.insert("Transfer-Encoding", "chunked");
            true
        }
    }
}

/// Write the request head and body, each write bounded by `limit`.
pub async fn write_request<W>(
    io: &mut W,
    target: &str,
    head: &[u8],
    body: Body,
    chunked: bool,
    limit: Duration,
) -> Result<(), ProxyError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    write_bounded(io, target, head, limit).await?;

    match body {
        Body::Empty => {}
        Body::Full(bytes) => write_bounded(io, target, &bytes, limit).await?,
        Body::Stream(mut stream) => {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| {
                    ProxyError::InvalidRequest(format!("request body stream failed: {e}"))
                })?;
                if chunk.is_empty() {
                    continue;
                }
                if chunked {
                    let size_line = format!("{:X}\r\n", chunk.len());
                    write_bounded(io, target, size_line.as_bytes(), limit).await?;
                    write_bounded(io, target, &chunk, limit).await?;
                    write_bounded(io, target, b"\r\n", limit).await?;
                } else {
                    write_bounded(io, target, &chunk, limit).await?;
                }
            }
            if chunked {
                write_bounded(io, target, b"0\r\n\r\n", limit).await?;
            }
        }
    }

    with_timeout(Stage::RequestWrite, limit, io.flush())
        .await?
        .map_err(|source| connection_error(target, source))
}

async fn write_bounded<W>(
    io: &mut W,
    target: &str,
    data: &[u8],
    limit: Duration,
) -> Result<(), ProxyError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    with_timeout(Stage::RequestWrite, limit, io.write_all(data))
        .await?
        .map_err(|source| connection_error(target, source))
}

fn connection_error(target: &str, source: std::io::Error) -> ProxyError {
    ProxyError::Connection {
        target: target.to_string(),
        source,
    }
}

/// Read until a complete response head is buffered, then parse it.
///
/// Bytes after the head stay in `buf` for the body decoder.
pub async fn read_response_head<R>(
    io: &mut R,
    target: &str,
    buf: &mut BytesMut,
    max_head_bytes: usize,
) -> Result<ResponseHead, ProxyError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    loop {
        if let Some((len, head)) = parse_response_head(buf)? {
            buf.advance(len);
            return Ok(head);
        }
        if buf.len() >= max_head_bytes {
            return Err(ProxyError::Protocol(format!(
                "response head exceeds {max_head_bytes} bytes"
            )));
        }
        buf.reserve(READ_CHUNK_BYTES);
        let n = io
            .read_buf(buf)
            .await
            .map_err(|source| connection_error(target, source))?;
        if n == 0 {
            return Err(ProxyError::Protocol(
                "backend closed the connection before sending a complete response head".into(),
            ));
        }
    }
}

fn parse_response_head(buf: &[u8]) -> Result<Option<(usize, ResponseHead)>, ProxyError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    let len = match response.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(ProxyError::Protocol(format!("malformed response head: {e}"))),
    };

    let status = response
        .code
        .ok_or_else(|| ProxyError::Protocol("missing status code".into()))?;
    let reason = response.reason.unwrap_or_default().to_string();
    let headers = response
        .headers
        .iter()
        .map(|h| (h.name, String::from_utf8_lossy(h.value).into_owned()))
        .collect();

    Ok(Some((
        len,
        ResponseHead {
            status,
            reason,
            headers,
        },
    )))
}

/// Body framing of a response to `method` (RFC 9112 section 6.3).
pub fn response_framing(
    method: &Method,
    status: u16,
    headers: &HeaderList,
) -> Result<BodyFraming, ProxyError> {
    if method == Method::HEAD || (100..200).contains(&status) || status == 204 || status == 304 {
        return Ok(BodyFraming::Empty);
    }

    // Transfer-Encoding is stripped before delivery, so any coding other
    // than chunked would reach the caller undecoded and unlabelled.
    let codings = headers.tokens("transfer-encoding");
    if !codings.is_empty() {
        if codings.len() == 1 && codings[0] == "chunked" {
            return Ok(BodyFraming::Chunked);
        }
        return Err(ProxyError::Protocol(format!(
            "unsupported transfer coding {:?}",
            codings.join(", ")
        )));
    }

    let mut length: Option<u64> = None;
    for value in headers.get_all("content-length") {
        for part in value.split(',') {
            let parsed: u64 = part.trim().parse().map_err(|_| {
                ProxyError::Protocol(format!("invalid Content-Length {value:?}"))
            })?;
            match length {
                Some(existing) if existing != parsed => {
                    return Err(ProxyError::Protocol(
                        "conflicting Content-Length values".into(),
                    ));
                }
                _ => length = Some(parsed),
            }
        }
    }

    Ok(match length {
        Some(0) => BodyFraming::Empty,
        Some(len) => BodyFraming::Length(len),
        None => BodyFraming::UntilClose,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decode {
    Length(u64),
    ChunkSize,
    ChunkData(u64),
    ChunkDataEnd,
    Trailers,
    UntilClose,
    Done,
}

/// Pull source over a backend response body.
///
/// Holds the backend connection until the body ends, fails, or the value is
/// dropped, whichever comes first.
pub struct BackendBody {
    io: Option<BoxedIo>,
    buf: BytesMut,
    state: Decode,
    read_timeout: Duration,
    target: String,
    guard: Option<ConnectionGuard>,
}

impl BackendBody {
    pub(crate) fn new(
        io: BoxedIo,
        buf: BytesMut,
        framing: BodyFraming,
        read_timeout: Duration,
        target: String,
        guard: Option<ConnectionGuard>,
    ) -> Self {
        let state = match framing {
            BodyFraming::Empty => Decode::Done,
            BodyFraming::Length(len) => Decode::Length(len),
            BodyFraming::Chunked => Decode::ChunkSize,
            BodyFraming::UntilClose => Decode::UntilClose,
        };
        let mut body = Self {
            io: Some(io),
            buf,
            state,
            read_timeout,
            target,
            guard,
        };
        if body.state == Decode::Done {
            body.release();
        }
        body
    }

    /// True once the backend signalled end-of-body (or the body failed).
    pub fn is_end_stream(&self) -> bool {
        self.state == Decode::Done
    }

    /// Next chunk of body data, `None` at the end.
    ///
    /// Data is returned as soon as any arrives. The connection is released at
    /// the end of the body and on the first error.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, ProxyError> {
        let result = self.decode().await;
        match &result {
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => {
                self.state = Decode::Done;
                self.release();
            }
        }
        result
    }

    /// Shut the connection down without reading the rest of the body.
    pub async fn close(mut self) {
        self.state = Decode::Done;
        if let Some(mut io) = self.io.take() {
            let _ = tokio::time::timeout(self.read_timeout, io.shutdown()).await;
        }
        self.guard = None;
    }

    async fn decode(&mut self) -> Result<Option<Bytes>, ProxyError> {
        loop {
            match self.state {
                Decode::Done => return Ok(None),
                Decode::Length(0) => self.state = Decode::Done,
                Decode::Length(remaining) => {
                    let chunk = self.take_data(remaining).await?;
                    self.state = Decode::Length(remaining - chunk.len() as u64);
                    return Ok(Some(chunk));
                }
                Decode::UntilClose => {
                    if self.buf.is_empty() && self.fill().await? == 0 {
                        self.state = Decode::Done;
                        continue;
                    }
                    return Ok(Some(self.buf.split().freeze()));
                }
                Decode::ChunkSize => {
                    let line = self.read_line().await?;
                    let size = parse_chunk_size(&line)?;
                    self.state = if size == 0 {
                        Decode::Trailers
                    } else {
                        Decode::ChunkData(size)
                    };
                }
                Decode::ChunkData(remaining) => {
                    let chunk = self.take_data(remaining).await?;
                    let left = remaining - chunk.len() as u64;
                    self.state = if left == 0 {
                        Decode::ChunkDataEnd
                    } else {
                        Decode::ChunkData(left)
                    };
                    return Ok(Some(chunk));
                }
                Decode::ChunkDataEnd => {
                    let line = self.read_line().await?;
                    if !line.is_empty() {
                        return Err(ProxyError::Protocol("missing CRLF after chunk data".into()));
                    }
                    self.state = Decode::ChunkSize;
                }
                Decode::Trailers => {
                    // trailers are not relayed
                    if self.read_line().await?.is_empty() {
                        self.state = Decode::Done;
                    }
                }
            }
        }
    }

    async fn take_data(&mut self, remaining: u64) -> Result<Bytes, ProxyError> {
        if self.buf.is_empty() && self.fill().await? == 0 {
            return Err(ProxyError::Protocol(
                "backend closed the connection in the middle of the body".into(),
            ));
        }
        let n = remaining.min(self.buf.len() as u64) as usize;
        Ok(self.buf.split_to(n).freeze())
    }

    async fn read_line(&mut self) -> Result<BytesMut, ProxyError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let mut line = self.buf.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(pos - 1);
                }
                return Ok(line);
            }
            if self.buf.len() > MAX_LINE_BYTES {
                return Err(ProxyError::Protocol("chunk header line too long".into()));
            }
            if self.fill().await? == 0 {
                return Err(ProxyError::Protocol(
                    "backend closed the connection inside a chunked body".into(),
                ));
            }
        }
    }

    async fn fill(&mut self) -> Result<usize, ProxyError> {
        let Self {
            io,
            buf,
            read_timeout,
            target,
            ..
        } = self;
        let io = io
            .as_mut()
            .ok_or_else(|| ProxyError::Protocol("backend connection already closed".into()))?;
        buf.reserve(READ_CHUNK_BYTES);
        with_timeout(Stage::ResponseBody, *read_timeout, io.read_buf(buf))
            .await?
            .map_err(|source| connection_error(target, source))
    }

    fn release(&mut self) {
        if self.io.take().is_some() {
            tracing::trace!(target = %self.target, "Backend connection released");
        }
        self.guard = None;
    }
}

impl fmt::Debug for BackendBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendBody")
            .field("target", &self.target)
            .field("state", &self.state)
            .field("buffered", &self.buf.len())
            .field("open", &self.io.is_some())
            .finish()
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ProxyError> {
    let digits = line.split(|b| *b == b';').next().unwrap_or_default();
    let digits = std::str::from_utf8(digits)
        .map_err(|_| ProxyError::Protocol("non-ASCII chunk size".into()))?
        .trim();
    u64::from_str_radix(digits, 16)
        .map_err(|_| ProxyError::Protocol(format!("invalid chunk size {digits:?}")))
}
