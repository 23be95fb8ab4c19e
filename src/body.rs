//! Request body sources and chunk descriptors.
//!
//! The encoder pulls outgoing bytes through [`BodySource`]: a bounded
//! destination slice is offered, the source fills as much of it as it
//! wants, and `status()` reports EOF once every byte has been produced.
//! This keeps encoding strictly within the connection's bounded write
//! buffers; nothing is ever buffered ahead of what the transport can take.

use std::error::Error as StdError;
use std::fmt;

use bytes::Bytes;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Whether a body source can still produce bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyStatus {
    /// More bytes may follow.
    Ok,
    /// Every byte has been produced.
    Eof,
}

/// A pull-based source of outgoing body bytes.
///
/// Contract: each `read` may fill any non-zero amount up to `dst.len()`
/// when data is available (zero means "try again later"); `status()` must
/// report [`BodyStatus::Eof`] as soon as the last byte has been read out,
/// and never before.
pub trait BodySource: Send {
    /// Fills up to `dst.len()` bytes, returning how many were written.
    fn read(&mut self, dst: &mut [u8]) -> Result<usize, BoxError>;

    /// Reports whether the source has produced all of its bytes.
    fn status(&self) -> BodyStatus;

    /// The total number of bytes this source will produce, if known.
    fn length(&self) -> Option<u64>;
}

/// A [`BodySource`] over an in-memory buffer.
#[derive(Clone, Debug)]
pub struct BufSource {
    data: Bytes,
    total: u64,
}

impl BufSource {
    /// Wraps a buffer as a body source.
    pub fn new<B: Into<Bytes>>(data: B) -> BufSource {
        let data = data.into();
        let total = data.len() as u64;
        BufSource { data, total }
    }
}

impl BodySource for BufSource {
    fn read(&mut self, dst: &mut [u8]) -> Result<usize, BoxError> {
        let n = std::cmp::min(dst.len(), self.data.len());
        dst[..n].copy_from_slice(&self.data[..n]);
        self.data = self.data.slice(n..);
        Ok(n)
    }

    fn status(&self) -> BodyStatus {
        if self.data.is_empty() {
            BodyStatus::Eof
        } else {
            BodyStatus::Ok
        }
    }

    fn length(&self) -> Option<u64> {
        Some(self.total)
    }
}

type ChunkCallback = Box<dyn FnOnce(crate::Result<()>) + Send>;

/// One chunk of a `Transfer-Encoding: chunked` request body.
///
/// A chunk declares its payload size up front; the size line on the wire
/// reflects the declared size, and a payload source that yields more or
/// fewer bytes fails the stream. A chunk with declared size `0` is the
/// body terminator and must be the last chunk written.
pub struct Chunk {
    pub(crate) size: u64,
    pub(crate) data: Option<Box<dyn BodySource>>,
    pub(crate) extensions: Vec<(Bytes, Bytes)>,
    pub(crate) on_complete: Option<ChunkCallback>,
}

impl Chunk {
    /// Creates a chunk with a declared payload size and its payload source.
    pub fn new<B: BodySource + 'static>(data: B, size: u64) -> Chunk {
        Chunk {
            size,
            data: Some(Box::new(data)),
            extensions: Vec::new(),
            on_complete: None,
        }
    }

    /// Creates a chunk from an in-memory buffer; the declared size is the
    /// buffer's length.
    pub fn from_buf<B: Into<Bytes>>(data: B) -> Chunk {
        let source = BufSource::new(data);
        let size = source.total;
        Chunk::new(source, size)
    }

    /// Creates the zero-size terminating chunk.
    pub fn terminator() -> Chunk {
        Chunk {
            size: 0,
            data: None,
            extensions: Vec::new(),
            on_complete: None,
        }
    }

    /// Appends a `;key=value` chunk extension.
    ///
    /// Keys and values may be arbitrarily large; the encoder streams them
    /// across write buffers.
    pub fn extension<K, V>(mut self, key: K, value: V) -> Chunk
    where
        K: Into<Bytes>,
        V: Into<Bytes>,
    {
        self.extensions.push((key.into(), value.into()));
        self
    }

    /// Sets a callback fired exactly once when the chunk's last byte has
    /// been handed to the transport, or with the failure reason if the
    /// stream dies first.
    pub fn on_complete<F>(mut self, callback: F) -> Chunk
    where
        F: FnOnce(crate::Result<()>) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// Returns true if this is the zero-size terminating chunk.
    pub fn is_terminator(&self) -> bool {
        self.size == 0
    }

    /// Fires the completion callback (if any) and releases the payload.
    pub(crate) fn finish(mut self, result: crate::Result<()>) {
        self.data = None;
        if let Some(callback) = self.on_complete.take() {
            callback(result);
        }
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("size", &self.size)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}
