//! Request and response body types.
//!
//! [`RequestBody`] is what hyper writes to the wire. It is built from a
//! [`ByteSource`] once per attempt. With [`RequestBody::with_progress`] every
//! frame hyper pulls signals a [`Notify`], which the transport uses to tell a
//! slow upload from a stalled one.
//!
//! [`ResponseBody`] is read chunk by chunk. A body that comes off the wire
//! holds the pooled connection it arrived on: reading it to the end hands the
//! connection back to the pool, while an error, a stalled read or dropping the
//! body early evicts it.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, stream};
use http_body::{Frame, SizeHint};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use stowage_core::{ByteSource, ByteStream};
use tokio::sync::Notify;

use crate::error::TransportError;
use crate::pool::PooledConnection;

/// Largest data frame handed to hyper.
pub const MAX_FRAME_LEN: usize = 16 * 1024;

/// Outgoing request body.
#[derive(Default)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// A buffered body; the bytes not yet written.
    Buffered(Bytes),
    /// A single-pass stream with an optional declared length.
    Streaming {
        /// Chunks to send.
        stream: ByteStream,
        /// Declared length, reported as an exact size hint.
        length: Option<u64>,
    },
}

impl RequestBody {
    /// Create a buffered body.
    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        if data.is_empty() {
            Self::Empty
        } else {
            Self::Buffered(data)
        }
    }

    /// Split the body into frames of at most [`MAX_FRAME_LEN`] and signal
    /// `progress` as each one is pulled.
    #[must_use]
    pub fn with_progress(self, progress: Arc<Notify>) -> Self {
        let (source, length): (ByteStream, Option<u64>) = match self {
            Self::Empty => return Self::Empty,
            Self::Buffered(data) => {
                let length = data.len() as u64;
                (Box::pin(stream::once(async move { Ok::<_, std::io::Error>(data) })), Some(length))
            }
            Self::Streaming { stream, length } => (stream, length),
        };
        let framed = source
            .flat_map(|item| {
                let frames: Vec<std::io::Result<Bytes>> = match item {
                    Ok(data) => split_frames(data).into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(frames)
            })
            .inspect(move |_| progress.notify_one());
        Self::Streaming {
            stream: Box::pin(framed),
            length,
        }
    }
}

fn split_frames(mut data: Bytes) -> Vec<Bytes> {
    let mut frames = Vec::with_capacity(data.len().div_ceil(MAX_FRAME_LEN));
    while data.len() > MAX_FRAME_LEN {
        frames.push(data.split_to(MAX_FRAME_LEN));
    }
    if !data.is_empty() {
        frames.push(data);
    }
    frames
}

impl TryFrom<ByteSource> for RequestBody {
    type Error = TransportError;

    fn try_from(source: ByteSource) -> Result<Self, Self::Error> {
        match source {
            ByteSource::Empty => Ok(Self::Empty),
            ByteSource::Bytes(data) => Ok(Self::from_bytes(data)),
            ByteSource::Stream { stream, length } => stream
                .map(|stream| Self::Streaming { stream, length })
                .ok_or(TransportError::BodyConsumed),
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Buffered(data) => f.debug_tuple("Buffered").field(&data.len()).finish(),
            Self::Streaming { length, .. } => {
                f.debug_struct("Streaming").field("length", length).finish()
            }
        }
    }
}

impl http_body::Body for RequestBody {
    type Data = Bytes;
    type Error = std::io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.get_mut() {
            Self::Empty => Poll::Ready(None),
            Self::Buffered(data) => {
                if data.is_empty() {
                    return Poll::Ready(None);
                }
                let len = data.len().min(MAX_FRAME_LEN);
                Poll::Ready(Some(Ok(Frame::data(data.split_to(len)))))
            }
            Self::Streaming { stream, .. } => stream
                .as_mut()
                .poll_next(cx)
                .map(|item| item.map(|chunk| chunk.map(Frame::data))),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Buffered(data) => data.is_empty(),
            Self::Streaming { length, .. } => *length == Some(0),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            Self::Empty => SizeHint::with_exact(0),
            Self::Buffered(data) => SizeHint::with_exact(data.len() as u64),
            Self::Streaming { length, .. } => length.map(SizeHint::with_exact).unwrap_or_default(),
        }
    }
}

/// Incoming response body.
pub enum ResponseBody {
    /// Chunks already in memory.
    Buffered(VecDeque<Bytes>),
    /// A body still being read from a pooled connection.
    Wire(WireBody),
}

/// Response body bound to the connection it is read from.
pub struct WireBody {
    incoming: Incoming,
    connection: Option<PooledConnection>,
    read_timeout: Duration,
}

impl ResponseBody {
    /// An empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::Buffered(VecDeque::new())
    }

    /// A body made of a single buffered chunk.
    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let mut chunks = VecDeque::new();
        if !data.is_empty() {
            chunks.push_back(data);
        }
        Self::Buffered(chunks)
    }

    /// A body made of several buffered chunks, delivered in order.
    #[must_use]
    pub fn from_chunks(chunks: impl IntoIterator<Item = Bytes>) -> Self {
        Self::Buffered(chunks.into_iter().filter(|c| !c.is_empty()).collect())
    }

    pub(crate) fn wire(incoming: Incoming, connection: PooledConnection, read_timeout: Duration) -> Self {
        if http_body::Body::is_end_stream(&incoming) {
            connection.release();
            return Self::empty();
        }
        Self::Wire(WireBody {
            incoming,
            connection: Some(connection),
            read_timeout,
        })
    }

    /// Read the next chunk, `None` at the end of the body.
    ///
    /// Each read waits at most the read timeout.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self {
            Self::Buffered(chunks) => Ok(chunks.pop_front()),
            Self::Wire(wire) => wire.next_chunk().await,
        }
    }

    /// Read the rest of the body into memory.
    ///
    /// ```
    /// use stowage_http::ResponseBody;
    ///
    /// # tokio_test::block_on(async {
    /// let body = ResponseBody::from_bytes("hello");
    /// assert_eq!(&body.collect().await.unwrap()[..], b"hello");
    /// # });
    /// ```
    pub async fn collect(mut self) -> Result<Bytes, TransportError> {
        if let Self::Buffered(chunks) = &mut self {
            if chunks.len() <= 1 {
                return Ok(chunks.pop_front().unwrap_or_default());
            }
        }
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

impl WireBody {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            match tokio::time::timeout(self.read_timeout, self.incoming.frame()).await {
                Err(_) => {
                    self.evict();
                    return Err(TransportError::ReadTimeout(self.read_timeout));
                }
                Ok(None) => {
                    if let Some(connection) = self.connection.take() {
                        connection.release();
                    }
                    return Ok(None);
                }
                Ok(Some(Err(e))) => {
                    self.evict();
                    return Err(TransportError::Http(e));
                }
                Ok(Some(Ok(frame))) => {
                    // Trailers and empty data frames carry nothing for the caller.
                    if let Ok(data) = frame.into_data() {
                        if !data.is_empty() {
                            return Ok(Some(data));
                        }
                    }
                }
            }
        }
    }

    fn evict(&mut self) {
        drop(self.connection.take());
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered(chunks) => f.debug_tuple("Buffered").field(&chunks.len()).finish(),
            Self::Wire(wire) => f
                .debug_struct("Wire")
                .field("pooled", &wire.connection.is_some())
                .field("read_timeout", &wire.read_timeout)
                .finish(),
        }
    }
}

impl fmt::Debug for WireBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireBody")
            .field("pooled", &self.connection.is_some())
            .finish_non_exhaustive()
    }
}
