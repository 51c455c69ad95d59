//! Body sources.
//!
//! Both request and response bodies are single-pass: once a stream has been
//! consumed it cannot be read again.

use std::fmt;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use futures_util::Stream;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{BoxError, ProxyError};
use crate::net::codec::BackendBody;

/// Lazy stream of request body chunks.
pub type ChunkStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// Request body carried by a [`RequestContext`](crate::http::RequestContext).
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    /// Fully materialized bytes.
    Full(Bytes),
    /// Chunks pulled lazily, e.g. straight from the inbound connection.
    Stream(ChunkStream),
}

impl Body {
    pub fn empty() -> Self {
        Body::Empty
    }

    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Body::Stream(stream.map_err(Into::<BoxError>::into).boxed())
    }

    /// Exact length when it is known without reading.
    pub fn known_length(&self) -> Option<u64> {
        match self {
            Body::Empty => Some(0),
            Body::Full(bytes) => Some(bytes.len() as u64),
            Body::Stream(_) => None,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Body::Stream(_))
    }

    /// Drain the body into memory.
    pub async fn collect(self) -> Result<Bytes, BoxError> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Full(bytes) => Ok(bytes),
            Body::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Body::Empty"),
            Body::Full(bytes) => f.debug_tuple("Body::Full").field(&bytes.len()).finish(),
            Body::Stream(_) => f.write_str("Body::Stream(..)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Full(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Full(bytes.into())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Full(text.into())
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::Full(Bytes::from_static(text.as_bytes()))
    }
}

/// Response body handed to the response hook and to the caller.
pub enum ResponseBody {
    /// Materialized bytes (buffered mode, or replaced by a hook).
    Full(Bytes),
    /// Live body still arriving from the backend (streaming mode).
    Live(BackendBody),
}

impl ResponseBody {
    pub fn empty() -> Self {
        ResponseBody::Full(Bytes::new())
    }

    pub fn is_live(&self) -> bool {
        matches!(self, ResponseBody::Live(_))
    }

    /// Materialized bytes, if the body is not live.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            ResponseBody::Full(bytes) => Some(bytes),
            ResponseBody::Live(_) => None,
        }
    }

    /// Drain the body. A live body's backend connection is closed afterwards.
    pub async fn collect(self) -> Result<Bytes, ProxyError> {
        match self {
            ResponseBody::Full(bytes) => Ok(bytes),
            ResponseBody::Live(mut body) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = body.next_chunk().await? {
                    buf.extend_from_slice(&chunk);
                }
                Ok(buf.freeze())
            }
        }
    }

    /// Chunks in backend order. Dropping the stream closes the backend
    /// connection.
    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes, ProxyError>> {
        match self {
            ResponseBody::Full(bytes) if bytes.is_empty() => stream::empty().boxed(),
            ResponseBody::Full(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            ResponseBody::Live(body) => stream::unfold(Some(body), |state| async move {
                let mut body = state?;
                match body.next_chunk().await {
                    Ok(Some(chunk)) => Some((Ok(chunk), Some(body))),
                    Ok(None) => None,
                    Err(err) => Some((Err(err), None)),
                }
            })
            .boxed(),
        }
    }

    /// Relay the body into `sink` chunk by chunk, flushing after each one.
    ///
    /// A failed write means the consumer went away: the backend connection is
    /// dropped before the error is returned.
    pub async fn pipe<W>(self, sink: &mut W) -> Result<u64, ProxyError>
    where
        W: AsyncWrite + Unpin,
    {
        match self {
            ResponseBody::Full(bytes) => {
                write_chunk(sink, &bytes).await?;
                Ok(bytes.len() as u64)
            }
            ResponseBody::Live(mut body) => {
                let mut written = 0u64;
                while let Some(chunk) = body.next_chunk().await? {
                    if let Err(err) = write_chunk(sink, &chunk).await {
                        tracing::debug!(written, "Consumer disconnected, closing backend connection");
                        drop(body);
                        return Err(err);
                    }
                    written += chunk.len() as u64;
                }
                Ok(written)
            }
        }
    }
}

async fn write_chunk<W>(sink: &mut W, chunk: &[u8]) -> Result<(), ProxyError>
where
    W: AsyncWrite + Unpin,
{
    sink.write_all(chunk).await.map_err(ProxyError::Downstream)?;
    sink.flush().await.map_err(ProxyError::Downstream)
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Full(bytes) => f
                .debug_tuple("ResponseBody::Full")
                .field(&bytes.len())
                .finish(),
            ResponseBody::Live(body) => f.debug_tuple("ResponseBody::Live").field(body).finish(),
        }
    }
}

impl From<Bytes> for ResponseBody {
    fn from(bytes: Bytes) -> Self {
        ResponseBody::Full(bytes)
    }
}

impl From<&'static str> for ResponseBody {
    fn from(text: &'static str) -> Self {
        ResponseBody::Full(Bytes::from_static(text.as_bytes()))
    }
}

impl From<String> for ResponseBody {
    fn from(text: String) -> Self {
        ResponseBody::Full(text.into())
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(bytes: Vec<u8>) -> Self {
        ResponseBody::Full(bytes.into())
    }
}
