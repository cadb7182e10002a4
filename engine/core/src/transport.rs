//! Transport Readers
//!
//! A transport reader exposes an opaque, ordered sequence of [`RawChunk`]s from
//! an already-open connection. Building and sending the request is somebody
//! else's job; readers only consume the body.
//!
//! # Available Readers
//!
//! - [`ResponseBodyReader`]: the body of an open `reqwest::Response`
//! - [`AsyncReadReader`]: any `tokio::io::AsyncRead` (files, stdin, pipes)
//! - [`ChannelReader`]: chunks pushed through an in-process channel
//! - [`ChunkQueueReader`]: a fixed list of chunks (replays and tests)
//!
//! Readers never panic and never fail on `cancel()`. A connection failure is
//! delivered as `Some(Err(TransportError))`, after which the reader reports
//! end of stream.

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Default read size for [`AsyncReadReader`]
pub const DEFAULT_READ_SIZE: usize = 8 * 1024;

// ============================================================================
// Raw Chunks
// ============================================================================

/// An opaque unit of body data as delivered by the transport
///
/// Chunk boundaries carry no meaning: a chunk may end mid-line or even in the
/// middle of a multi-byte character.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawChunk(Bytes);

impl RawChunk {
    /// Wrap bytes as a chunk
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Borrow the chunk contents
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the chunk carries no data
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Bytes> for RawChunk {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for RawChunk {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for RawChunk {
    fn from(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }
}

impl From<String> for RawChunk {
    fn from(text: String) -> Self {
        Self(Bytes::from(text))
    }
}

impl From<&str> for RawChunk {
    fn from(text: &str) -> Self {
        Self(Bytes::copy_from_slice(text.as_bytes()))
    }
}

// ============================================================================
// Reader Trait
// ============================================================================

/// Source of raw chunks for one session
///
/// Implementations must yield chunks in arrival order and must stop yielding
/// after `cancel()` has been called.
#[async_trait]
pub trait TransportReader: Send {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Wait for the next chunk
    ///
    /// Returns `None` once the body is exhausted or the reader was cancelled.
    async fn next_chunk(&mut self) -> Option<Result<RawChunk, TransportError>>;

    /// Stop reading; later calls to `next_chunk` return `None`
    fn cancel(&mut self);
}

// ============================================================================
// HTTP Response Bodies
// ============================================================================

/// Reads the body of an open HTTP response
///
/// A non-success status is reported as the first item rather than from the
/// constructor, so callers always get a reader they can hand to the engine.
pub struct ResponseBodyReader {
    stream: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    pending_error: Option<TransportError>,
}

impl ResponseBodyReader {
    /// Wrap an open response
    #[must_use]
    pub fn new(response: reqwest::Response) -> Self {
        let status = response.status();
        if status.is_success() {
            Self {
                stream: Some(response.bytes_stream().boxed()),
                pending_error: None,
            }
        } else {
            Self {
                stream: None,
                pending_error: Some(TransportError::HttpStatus {
                    status: status.as_u16(),
                }),
            }
        }
    }
}

#[async_trait]
impl TransportReader for ResponseBodyReader {
    fn name(&self) -> &str {
        "http-body"
    }

    async fn next_chunk(&mut self) -> Option<Result<RawChunk, TransportError>> {
        if let Some(error) = self.pending_error.take() {
            return Some(Err(error));
        }

        let stream = self.stream.as_mut()?;
        match stream.next().await {
            Some(Ok(bytes)) => Some(Ok(RawChunk::from(bytes))),
            Some(Err(e)) => {
                self.stream = None;
                Some(Err(TransportError::from(e)))
            }
            None => {
                self.stream = None;
                None
            }
        }
    }

    fn cancel(&mut self) {
        // Dropping the body stream closes the connection
        self.stream = None;
        self.pending_error = None;
    }
}

// ============================================================================
// AsyncRead Sources
// ============================================================================

/// Reads chunks from any async byte source
pub struct AsyncReadReader<R> {
    reader: Option<R>,
    read_size: usize,
}

impl<R> AsyncReadReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Create a reader with the default read size
    pub fn new(reader: R) -> Self {
        Self::with_read_size(reader, DEFAULT_READ_SIZE)
    }

    /// Create a reader that requests at most `read_size` bytes per chunk
    pub fn with_read_size(reader: R, read_size: usize) -> Self {
        Self {
            reader: Some(reader),
            read_size: read_size.max(1),
        }
    }
}

#[async_trait]
impl<R> TransportReader for AsyncReadReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    fn name(&self) -> &str {
        "async-read"
    }

    async fn next_chunk(&mut self) -> Option<Result<RawChunk, TransportError>> {
        let reader = self.reader.as_mut()?;
        let mut buf = vec![0u8; self.read_size];

        match reader.read(&mut buf).await {
            Ok(0) => {
                self.reader = None;
                None
            }
            Ok(n) => {
                buf.truncate(n);
                Some(Ok(RawChunk::from(buf)))
            }
            Err(e) => {
                self.reader = None;
                Some(Err(TransportError::from(e)))
            }
        }
    }

    fn cancel(&mut self) {
        self.reader = None;
    }
}

// ============================================================================
// In-Process Channel
// ============================================================================

/// Receives chunks pushed through a tokio mpsc channel
pub struct ChannelReader {
    receiver: mpsc::Receiver<Result<RawChunk, TransportError>>,
    cancelled: bool,
}

impl ChannelReader {
    /// Wrap an existing receiver
    #[must_use]
    pub fn new(receiver: mpsc::Receiver<Result<RawChunk, TransportError>>) -> Self {
        Self {
            receiver,
            cancelled: false,
        }
    }

    /// Create a bounded channel and return its sending half with the reader
    #[must_use]
    pub fn channel(capacity: usize) -> (mpsc::Sender<Result<RawChunk, TransportError>>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl TransportReader for ChannelReader {
    fn name(&self) -> &str {
        "channel"
    }

    async fn next_chunk(&mut self) -> Option<Result<RawChunk, TransportError>> {
        if self.cancelled {
            return None;
        }
        self.receiver.recv().await
    }

    fn cancel(&mut self) {
        self.cancelled = true;
        self.receiver.close();
    }
}

// ============================================================================
// Fixed Chunk Lists
// ============================================================================

/// Yields a predetermined list of chunks, then ends
#[derive(Debug, Default)]
pub struct ChunkQueueReader {
    chunks: VecDeque<Result<RawChunk, TransportError>>,
}

impl ChunkQueueReader {
    /// Build from successful chunks
    pub fn from_chunks<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<RawChunk>,
    {
        Self {
            chunks: chunks.into_iter().map(|c| Ok(c.into())).collect(),
        }
    }

    /// Append a transport failure after the queued chunks
    #[must_use]
    pub fn then_fail(mut self, error: TransportError) -> Self {
        self.chunks.push_back(Err(error));
        self
    }

    /// Number of items still queued
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.chunks.len()
    }
}

#[async_trait]
impl TransportReader for ChunkQueueReader {
    fn name(&self) -> &str {
        "chunk-queue"
    }

    async fn next_chunk(&mut self) -> Option<Result<RawChunk, TransportError>> {
        let item = self.chunks.pop_front()?;
        if item.is_err() {
            self.chunks.clear();
        }
        Some(item)
    }

    fn cancel(&mut self) {
        self.chunks.clear();
    }
}
